use std::path::Path;

use anyhow::{Context, Result};
use envdeck_core::{spawn_operation, OperationEvent, OperationReporter, SystemRunner};
use envdeck_pip::{
    unchecked, DependencyReport, LatestVersion, OutdatedPackage, PackageError, PackageInfo,
    PackageService,
};

use crate::dispatch::{AppContext, PkgCommands};
use crate::env_flows::{confirm_on_terminal, load_registry, resolve_environment};
use crate::render::TerminalRenderer;

pub fn open_package_service(
    ctx: &AppContext,
    path_or_name: &str,
) -> Result<PackageService<SystemRunner>> {
    let registry = load_registry(ctx);
    let record = resolve_environment(&registry, path_or_name)?;
    let service = PackageService::open(SystemRunner, &record.path)
        .with_context(|| format!("cannot open environment {}", record.name))?;
    Ok(service.with_outdated_deadline(ctx.config.outdated_deadline()))
}

pub fn run_package_command(
    ctx: &AppContext,
    service: PackageService<SystemRunner>,
    command: PkgCommands,
) -> Result<()> {
    let renderer = ctx.renderer;
    match command {
        PkgCommands::List { skip_outdated } => {
            renderer.print_status(
                "step",
                &format_environment_header(service.env_root(), service.interpreter_version()),
            );
            let packages = if skip_outdated {
                unchecked(service.list_installed()?)
            } else {
                let refresh = service.refresh()?;
                if let Some(err) = &refresh.outdated_error {
                    renderer.print_status(
                        "warn",
                        &format!("latest versions unavailable: {err}"),
                    );
                }
                refresh.packages
            };
            renderer.print_lines(&format_package_lines(&packages));
        }
        PkgCommands::Outdated => {
            let outdated = service.list_outdated()?;
            renderer.print_lines(&format_outdated_lines(&outdated));
        }
        PkgCommands::Install { name, version } => {
            let message = match &version {
                Some(version) => format!("installing {name}=={version}"),
                None => format!("installing {name}"),
            };
            run_streaming(renderer, &message, move |reporter| {
                service.install(&name, version.as_deref(), reporter)
            })?;
        }
        PkgCommands::Uninstall { name, yes } => {
            let prompt = format!(
                "Uninstall {name} from {}?",
                service.env_root().display()
            );
            if !yes && !confirm_on_terminal(&prompt)? {
                renderer.print_status("warn", "uninstall cancelled");
                return Ok(());
            }
            run_streaming(renderer, &format!("uninstalling {name}"), move |reporter| {
                service.uninstall(&name, reporter)
            })?;
        }
        PkgCommands::Upgrade { name } => {
            run_streaming(renderer, &format!("upgrading {name}"), move |reporter| {
                service.upgrade(&name, reporter)
            })?;
        }
        PkgCommands::UpgradeAll => {
            let names = service
                .list_outdated()?
                .into_iter()
                .map(|package| package.name)
                .collect::<Vec<_>>();
            if names.is_empty() {
                renderer.print_status("ok", "all packages are up to date");
                return Ok(());
            }
            let message = format!("upgrading {}", names.join(", "));
            run_streaming(renderer, &message, move |reporter| {
                service.upgrade_all(&names, reporter)
            })?;
        }
        PkgCommands::InstallLocal { file } => {
            let message = format!("installing {}", file.display());
            run_streaming(renderer, &message, move |reporter| {
                service.install_local(&file, reporter)
            })?;
        }
        PkgCommands::Deps { name } => {
            let report = service.show_dependencies(&name)?;
            renderer.print_lines(&format_dependency_lines(&report));
        }
    }

    Ok(())
}

/// Runs a package-manager operation off the main thread and prints its
/// output lines as they arrive.
fn run_streaming<F>(renderer: TerminalRenderer, message: &str, operation: F) -> Result<()>
where
    F: FnOnce(&mut OperationReporter<(), PackageError>) -> Result<(), PackageError>
        + Send
        + 'static,
{
    renderer.print_status("step", message);
    let handle = spawn_operation(operation);
    handle.finish(|event| {
        if let OperationEvent::Line { text, .. } = event {
            println!("{text}");
        }
    })?;
    renderer.print_status("ok", &format!("{message}: done"));
    Ok(())
}

pub fn format_environment_header(env_root: &Path, interpreter_version: &str) -> String {
    format!("{} ({interpreter_version})", env_root.display())
}

pub fn format_package_lines(packages: &[PackageInfo]) -> Vec<String> {
    if packages.is_empty() {
        return vec!["No packages installed".to_string()];
    }

    let name_width = packages
        .iter()
        .map(|package| package.name.len())
        .max()
        .unwrap_or(0);
    packages
        .iter()
        .map(|package| {
            let latest = match &package.latest {
                LatestVersion::NotChecked => String::new(),
                LatestVersion::UpToDate => "  (latest)".to_string(),
                LatestVersion::Available(version) => format!("  -> {version}"),
            };
            format!(
                "{:<name_width$}  {}{latest}",
                package.name, package.installed_version
            )
        })
        .collect()
}

pub fn format_outdated_lines(outdated: &[OutdatedPackage]) -> Vec<String> {
    if outdated.is_empty() {
        return vec!["All packages are up to date".to_string()];
    }
    outdated
        .iter()
        .map(|package| {
            format!(
                "{} {} -> {}",
                package.name, package.current_version, package.latest_version
            )
        })
        .collect()
}

pub fn format_dependency_lines(report: &DependencyReport) -> Vec<String> {
    let mut lines = vec![format!("{} requires:", report.package)];
    if report.dependencies.is_empty() {
        lines.push("  (nothing)".to_string());
    }
    for dependency in &report.dependencies {
        lines.push(format!("  {} {}", dependency.name, dependency.version));
    }

    let required_by = if report.required_by.is_empty() {
        "(nothing)".to_string()
    } else {
        report.required_by.join(", ")
    };
    lines.push(format!("required by: {required_by}"));
    lines
}

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use envdeck_core::{EnvironmentRecord, SystemRunner};
use envdeck_pip::{create_environment, import_environment, system_python_version};
use envdeck_registry::{backup_environment, EnvironmentRegistry, RegistryLoadIssue};

use crate::dispatch::AppContext;

pub fn load_registry(ctx: &AppContext) -> EnvironmentRegistry {
    let (registry, issue) = EnvironmentRegistry::load(ctx.layout.registry_path());
    if let Some(issue) = issue {
        ctx.renderer
            .print_status("warn", &format_load_issue(&issue));
    }
    registry
}

pub fn format_load_issue(issue: &RegistryLoadIssue) -> String {
    match &issue.quarantined_to {
        Some(moved) => format!(
            "environment registry {} was unusable ({}); moved to {} and starting empty",
            issue.path.display(),
            issue.reason,
            moved.display()
        ),
        None => format!(
            "environment registry {} was unusable ({}); starting empty",
            issue.path.display(),
            issue.reason
        ),
    }
}

/// Accepts a registered path, a path relative to the working directory, or a name.
pub fn resolve_environment(
    registry: &EnvironmentRegistry,
    path_or_name: &str,
) -> Result<EnvironmentRecord> {
    if let Ok(record) = registry.resolve(path_or_name) {
        return Ok(record.clone());
    }
    let absolute = std::path::absolute(path_or_name)
        .with_context(|| format!("failed to resolve path: {path_or_name}"))?;
    registry
        .find(&absolute)
        .cloned()
        .with_context(|| format!("no registered environment matches '{path_or_name}'"))
}

pub fn format_environment_lines(records: &[EnvironmentRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No registered environments".to_string()];
    }

    let name_width = records
        .iter()
        .map(|record| record.name.len())
        .max()
        .unwrap_or(0);
    let version_width = records
        .iter()
        .map(|record| record.interpreter_version.len())
        .max()
        .unwrap_or(0);
    records
        .iter()
        .map(|record| {
            format!(
                "{:<name_width$}  {:<version_width$}  {}",
                record.name,
                record.interpreter_version,
                record.path.display()
            )
        })
        .collect()
}

pub fn run_env_list(ctx: &AppContext) -> Result<()> {
    let registry = load_registry(ctx);
    ctx.renderer
        .print_lines(&format_environment_lines(registry.records()));
    Ok(())
}

pub fn run_env_create(
    ctx: &AppContext,
    name: &str,
    location: &Path,
    python: Option<PathBuf>,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("environment name must not be empty");
    }

    let mut registry = load_registry(ctx);
    let target = std::path::absolute(location.join(name))
        .with_context(|| format!("failed to resolve {}", location.display()))?;
    if registry.find(&target).is_ok() {
        bail!("environment already registered: {}", target.display());
    }

    let python = python.unwrap_or_else(|| ctx.config.default_python.clone());
    ctx.renderer.print_status(
        "step",
        &format!("creating {name} with {}", python.display()),
    );
    let record = create_environment(&SystemRunner, &python, location, name)?;
    registry.add(record.clone())?;
    ctx.renderer.print_status(
        "ok",
        &format!(
            "created {} ({}) at {}",
            record.name,
            record.interpreter_version,
            record.path.display()
        ),
    );
    Ok(())
}

pub fn run_env_import(ctx: &AppContext, path: &Path) -> Result<()> {
    let mut registry = load_registry(ctx);
    let record = import_environment(&SystemRunner, path)?;
    registry.add(record.clone())?;
    ctx.renderer.print_status(
        "ok",
        &format!(
            "imported {} ({}) from {}",
            record.name,
            record.interpreter_version,
            record.path.display()
        ),
    );
    Ok(())
}

pub fn run_env_remove(ctx: &AppContext, path_or_name: &str) -> Result<()> {
    let mut registry = load_registry(ctx);
    let Ok(record) = resolve_environment(&registry, path_or_name) else {
        ctx.renderer.print_status(
            "warn",
            &format!("{path_or_name} is not registered; nothing removed"),
        );
        return Ok(());
    };

    registry.remove(&record.path)?;
    ctx.renderer.print_status(
        "ok",
        &format!(
            "removed {} from the registry; files left at {}",
            record.name,
            record.path.display()
        ),
    );
    Ok(())
}

pub fn run_env_backup(ctx: &AppContext, path_or_name: &str, dest: &Path) -> Result<()> {
    let registry = load_registry(ctx);
    let record = resolve_environment(&registry, path_or_name)?;
    ctx.renderer.print_status(
        "step",
        &format!("backing up {} to {}", record.name, dest.display()),
    );
    let backup = backup_environment(&record.path, &record.name, dest)?;
    ctx.renderer
        .print_status("ok", &format!("backup written to {}", backup.display()));
    Ok(())
}

pub fn run_python(ctx: &AppContext) {
    let version = system_python_version(&SystemRunner, &ctx.config.default_python);
    println!("{version}");
}

/// Reads one answer line; only `y` or `yes` (any case) confirms.
pub fn confirm<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "{prompt} [y/N] ").context("failed writing confirmation prompt")?;
    output.flush().context("failed writing confirmation prompt")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed reading confirmation answer")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

pub fn confirm_on_terminal(prompt: &str) -> Result<bool> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    confirm(prompt, &mut input, &mut output)
}

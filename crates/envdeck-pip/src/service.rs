use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use envdeck_core::{CommandRunner, Invocation, LineSink};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::probe::{pip_path, probe_interpreter};
use crate::types::{
    DependencyEntry, DependencyReport, InstalledPackage, LatestVersion, OutdatedPackage,
    PackageInfo, Refresh,
};
use crate::PackageError;

pub const NOT_INSTALLED: &str = "not installed";
pub const DEFAULT_OUTDATED_DEADLINE: Duration = Duration::from_secs(120);

/// Package operations against one environment, all delegated to its pip.
#[derive(Debug)]
pub struct PackageService<R> {
    runner: R,
    env_root: PathBuf,
    pip: PathBuf,
    interpreter_version: String,
    outdated_deadline: Option<Duration>,
}

impl<R: CommandRunner> PackageService<R> {
    /// Validates the environment layout by probing its interpreter and pip.
    pub fn open(runner: R, env_root: impl Into<PathBuf>) -> Result<Self, PackageError> {
        let env_root = env_root.into();
        let interpreter_version = probe_interpreter(&runner, &env_root)?;
        let pip = pip_path(&env_root).ok_or_else(|| PackageError::InvalidEnvironment {
            path: env_root.clone(),
            reason: "no pip executable found".to_string(),
        })?;

        Ok(Self {
            runner,
            env_root,
            pip,
            interpreter_version,
            outdated_deadline: Some(DEFAULT_OUTDATED_DEADLINE),
        })
    }

    /// `None` lets the outdated check run unbounded.
    pub fn with_outdated_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.outdated_deadline = deadline;
        self
    }

    pub fn env_root(&self) -> &Path {
        &self.env_root
    }

    pub fn interpreter_version(&self) -> &str {
        &self.interpreter_version
    }

    pub fn list_installed(&self) -> Result<Vec<InstalledPackage>, PackageError> {
        let invocation = self.pip_command(["list", "--format=json"]);
        let result = self.runner.run_captured(&invocation)?.check()?;
        parse_json(&invocation, &result.stdout)
    }

    /// Network-bound; every failure comes back as [`PackageError::PackageManager`].
    pub fn list_outdated(&self) -> Result<Vec<OutdatedPackage>, PackageError> {
        let mut invocation = self.pip_command(["list", "--outdated", "--format=json"]);
        invocation.deadline = self.outdated_deadline;

        let result = self
            .runner
            .run_captured(&invocation)
            .and_then(|result| result.check())
            .map_err(|source| PackageError::PackageManager {
                command: command_line(&invocation),
                source,
            })?;
        parse_json(&invocation, &result.stdout)
    }

    /// Lists installed packages, then merges in the outdated check. A failed
    /// outdated check is returned alongside the listing instead of failing it.
    pub fn refresh(&self) -> Result<Refresh, PackageError> {
        let installed = self.list_installed()?;
        match self.list_outdated() {
            Ok(outdated) => Ok(Refresh {
                packages: merge_outdated(installed, &outdated),
                outdated_error: None,
            }),
            Err(err) => {
                warn!(env = %self.env_root.display(), error = %err, "outdated check failed");
                Ok(Refresh {
                    packages: unchecked(installed),
                    outdated_error: Some(err),
                })
            }
        }
    }

    pub fn install(
        &self,
        name: &str,
        version: Option<&str>,
        sink: &mut dyn LineSink,
    ) -> Result<(), PackageError> {
        let requirement = match version.map(str::trim).filter(|version| !version.is_empty()) {
            Some(version) => format!("{name}=={version}"),
            None => name.to_string(),
        };
        self.stream(self.pip_command(["install"]).arg(requirement), sink)
    }

    /// Removes the package without prompting; confirmation belongs to the caller.
    pub fn uninstall(&self, name: &str, sink: &mut dyn LineSink) -> Result<(), PackageError> {
        self.stream(self.pip_command(["uninstall", "-y", name]), sink)
    }

    pub fn upgrade(&self, name: &str, sink: &mut dyn LineSink) -> Result<(), PackageError> {
        self.upgrade_all(&[name.to_string()], sink)
    }

    /// Upgrades every named package in a single pip call so they resolve together.
    pub fn upgrade_all(
        &self,
        names: &[String],
        sink: &mut dyn LineSink,
    ) -> Result<(), PackageError> {
        if names.is_empty() {
            debug!(env = %self.env_root.display(), "nothing to upgrade");
            return Ok(());
        }
        self.stream(
            self.pip_command(["install", "--upgrade"]).args(names),
            sink,
        )
    }

    pub fn install_local(&self, file: &Path, sink: &mut dyn LineSink) -> Result<(), PackageError> {
        if !file.is_file() {
            return Err(PackageError::FileNotFound {
                path: file.to_path_buf(),
            });
        }
        self.stream(self.pip_command(["install"]).arg(file), sink)
    }

    /// Resolves the installed version of each requirement of `name`. A
    /// requirement that cannot be resolved is reported as [`NOT_INSTALLED`].
    pub fn show_dependencies(&self, name: &str) -> Result<DependencyReport, PackageError> {
        let fields = self.show(name)?;
        let requires = split_list(fields.get("Requires").map(String::as_str));
        let required_by = split_list(fields.get("Required-by").map(String::as_str));

        let dependencies = requires
            .into_iter()
            .map(|dependency| {
                let version = match self.show(&dependency) {
                    Ok(fields) => fields
                        .get("Version")
                        .cloned()
                        .unwrap_or_else(|| NOT_INSTALLED.to_string()),
                    Err(err) => {
                        debug!(dependency = %dependency, error = %err, "dependency lookup failed");
                        NOT_INSTALLED.to_string()
                    }
                };
                DependencyEntry {
                    name: dependency,
                    version,
                    required_by: name.to_string(),
                }
            })
            .collect();

        Ok(DependencyReport {
            package: name.to_string(),
            dependencies,
            required_by,
        })
    }

    fn show(&self, name: &str) -> Result<HashMap<String, String>, PackageError> {
        let result = self
            .runner
            .run_captured(&self.pip_command(["show", name]))?
            .check()?;
        Ok(parse_show_fields(&result.stdout))
    }

    fn stream(&self, invocation: Invocation, sink: &mut dyn LineSink) -> Result<(), PackageError> {
        let invocation = invocation.streaming();
        info!(env = %self.env_root.display(), command = %command_line(&invocation), "running pip");
        self.runner.run(&invocation, sink)?.check()?;
        Ok(())
    }

    fn pip_command<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Invocation::new(&self.pip).args(args)
    }
}

/// Applies outdated results to the installed listing by normalised name.
/// Installed packages absent from `outdated` are up to date.
pub fn merge_outdated(
    installed: Vec<InstalledPackage>,
    outdated: &[OutdatedPackage],
) -> Vec<PackageInfo> {
    let latest_by_name: HashMap<String, &str> = outdated
        .iter()
        .map(|package| (normalize_name(&package.name), package.latest_version.as_str()))
        .collect();

    installed
        .into_iter()
        .map(|package| {
            let latest = match latest_by_name.get(&normalize_name(&package.name)) {
                Some(latest) => LatestVersion::Available((*latest).to_string()),
                None => LatestVersion::UpToDate,
            };
            PackageInfo {
                name: package.name,
                installed_version: package.version,
                latest,
            }
        })
        .collect()
}

pub fn unchecked(installed: Vec<InstalledPackage>) -> Vec<PackageInfo> {
    installed
        .into_iter()
        .map(|package| PackageInfo {
            name: package.name,
            installed_version: package.version,
            latest: LatestVersion::NotChecked,
        })
        .collect()
}

/// Lowercases and collapses runs of `-`, `_` and `.` into `-`.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.push(ch.to_ascii_lowercase());
            in_separator = false;
        }
    }
    normalized
}

fn parse_show_fields(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| !key.starts_with(char::is_whitespace))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_json<T: DeserializeOwned>(
    invocation: &Invocation,
    stdout: &str,
) -> Result<T, PackageError> {
    serde_json::from_str(stdout.trim()).map_err(|err| PackageError::Output {
        command: command_line(invocation),
        message: err.to_string(),
    })
}

fn command_line(invocation: &Invocation) -> String {
    let mut parts = vec![invocation.display_program()];
    parts.extend(invocation.display_args());
    parts.join(" ")
}

use std::path::{Path, PathBuf};

use envdeck_core::{first_existing, CommandRunner, Invocation};
use tracing::debug;

use crate::PackageError;

#[cfg(windows)]
const INTERPRETER_CANDIDATES: &[&str] = &["Scripts/python.exe"];
#[cfg(not(windows))]
const INTERPRETER_CANDIDATES: &[&str] = &["bin/python", "bin/python3"];

#[cfg(windows)]
const PIP_CANDIDATES: &[&str] = &["Scripts/pip.exe"];
#[cfg(not(windows))]
const PIP_CANDIDATES: &[&str] = &["bin/pip", "bin/pip3"];

pub const UNKNOWN_VERSION: &str = "Unknown";

pub fn interpreter_path(env_root: &Path) -> Option<PathBuf> {
    first_existing(env_root, INTERPRETER_CANDIDATES)
}

pub fn pip_path(env_root: &Path) -> Option<PathBuf> {
    first_existing(env_root, PIP_CANDIDATES)
}

/// Runs the environment's interpreter with `--version` and returns its
/// report verbatim, e.g. `Python 3.11.7`.
pub fn probe_interpreter<R: CommandRunner>(
    runner: &R,
    env_root: &Path,
) -> Result<String, PackageError> {
    let invalid = |reason: String| PackageError::InvalidEnvironment {
        path: env_root.to_path_buf(),
        reason,
    };

    let interpreter = interpreter_path(env_root).ok_or_else(|| {
        invalid(format!(
            "no interpreter found (looked for {})",
            INTERPRETER_CANDIDATES.join(", ")
        ))
    })?;

    let result = runner
        .run_captured(&Invocation::new(&interpreter).arg("--version"))
        .and_then(|result| result.check())
        .map_err(|err| invalid(err.to_string()))?;

    let version = version_text(&result.stdout, &result.stderr)
        .ok_or_else(|| invalid(format!("{} --version printed nothing", interpreter.display())))?;
    debug!(env = %env_root.display(), version = %version, "probed interpreter");
    Ok(version)
}

/// Version of an interpreter outside any environment, or [`UNKNOWN_VERSION`].
pub fn system_python_version<R: CommandRunner>(runner: &R, python: &Path) -> String {
    runner
        .run_captured(&Invocation::new(python).arg("--version"))
        .and_then(|result| result.check())
        .ok()
        .and_then(|result| version_text(&result.stdout, &result.stderr))
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

// Python 2 printed its version on stderr.
fn version_text(stdout: &str, stderr: &str) -> Option<String> {
    [stdout, stderr]
        .into_iter()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

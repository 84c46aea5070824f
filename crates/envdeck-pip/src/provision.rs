use std::path::{Path, PathBuf};

use envdeck_core::{CommandRunner, EnvironmentRecord, Invocation};
use tracing::info;

use crate::probe::probe_interpreter;
use crate::PackageError;

/// Creates `<location>/<name>` with `<python> -m venv` and returns the record
/// to register for it.
pub fn create_environment<R: CommandRunner>(
    runner: &R,
    python: &Path,
    location: &Path,
    name: &str,
) -> Result<EnvironmentRecord, PackageError> {
    let env_root = absolute(&location.join(name));
    runner
        .run_captured(
            &Invocation::new(python)
                .args(["-m", "venv"])
                .arg(&env_root),
        )?
        .check()?;

    let version = probe_interpreter(runner, &env_root)?;
    info!(env = %env_root.display(), version = %version, "created environment");
    Ok(EnvironmentRecord::new(name, env_root, version))
}

/// Builds a record for an existing environment directory, named after the
/// directory itself.
pub fn import_environment<R: CommandRunner>(
    runner: &R,
    path: &Path,
) -> Result<EnvironmentRecord, PackageError> {
    let env_root = absolute(path);
    if !env_root.is_dir() {
        return Err(PackageError::InvalidEnvironment {
            path: env_root,
            reason: "directory does not exist".to_string(),
        });
    }

    let name = env_root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PackageError::InvalidEnvironment {
            path: env_root.clone(),
            reason: "path has no directory name".to_string(),
        })?;
    let version = probe_interpreter(runner, &env_root)?;
    Ok(EnvironmentRecord::new(name, env_root, version))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

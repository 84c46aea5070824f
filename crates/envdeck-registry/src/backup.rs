use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use envdeck_core::copy_tree;
use tracing::info;

use crate::RegistryError;

/// Copies an environment to `<destination>/<name>_backup_<timestamp>/<name>`
/// and returns the copied environment root. The registry is not touched.
pub fn backup_environment(
    source: &Path,
    name: &str,
    destination: &Path,
) -> Result<PathBuf, RegistryError> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let container = destination.join(format!("{name}_backup_{stamp}"));
    let target = container.join(name);

    match copy_tree(source, &target, |_| false) {
        Ok(files) => {
            info!(
                source = %source.display(),
                target = %target.display(),
                files,
                "backed up environment"
            );
            Ok(target)
        }
        Err(source_err) => {
            let _ = fs::remove_dir_all(&container);
            Err(RegistryError::Backup {
                destination: container,
                source: source_err,
            })
        }
    }
}

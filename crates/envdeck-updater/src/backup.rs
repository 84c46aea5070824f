use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use envdeck_core::copy_tree;
use tracing::{info, warn};

use crate::InstallError;

pub const BACKUP_PREFIX: &str = "backup_";

/// Copies `install_dir` into `install_dir/backup_<timestamp>`, leaving out
/// earlier `backup_*` entries. A failed copy removes what it wrote, so the
/// installation is left as it was.
pub fn backup_installation(install_dir: &Path) -> Result<PathBuf, InstallError> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_dir = install_dir.join(format!("{BACKUP_PREFIX}{stamp}"));
    if backup_dir.exists() {
        return Err(InstallError::Backup {
            install_dir: install_dir.to_path_buf(),
            message: format!("{} already exists", backup_dir.display()),
        });
    }

    match copy_tree(install_dir, &backup_dir, |name| name.starts_with(BACKUP_PREFIX)) {
        Ok(files) => {
            info!(backup = %backup_dir.display(), files, "backed up installation");
            Ok(backup_dir)
        }
        Err(err) => {
            if let Err(cleanup) = fs::remove_dir_all(&backup_dir) {
                warn!(
                    backup = %backup_dir.display(),
                    error = %cleanup,
                    "failed to remove partial backup"
                );
            }
            Err(InstallError::Backup {
                install_dir: install_dir.to_path_buf(),
                message: err.to_string(),
            })
        }
    }
}

use std::io;
use std::path::PathBuf;

use envdeck_core::CopyTreeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("an environment is already registered at {}", .path.display())]
    DuplicatePath { path: PathBuf },
    #[error("no environment is registered for '{key}'")]
    NotFound { key: String },
    #[error("failed to persist registry {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to back up environment to {}: {source}", .destination.display())]
    Backup {
        destination: PathBuf,
        #[source]
        source: CopyTreeError,
    },
}

use std::path::PathBuf;

use envdeck_core::ProcessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("{} is not a usable environment: {reason}", .path.display())]
    InvalidEnvironment { path: PathBuf, reason: String },
    #[error("unexpected output from `{command}`: {message}")]
    Output { command: String, message: String },
    #[error("`{command}` failed: {source}")]
    PackageManager {
        command: String,
        #[source]
        source: ProcessError,
    },
    #[error("file not found: {}", .path.display())]
    FileNotFound { path: PathBuf },
    #[error(transparent)]
    Process(#[from] ProcessError),
}

use std::io;
use std::path::PathBuf;

use envdeck_core::VersionParseError;
use thiserror::Error;

use crate::UpdateState;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    VersionParse(#[from] VersionParseError),
    #[error("release metadata is malformed: {message}")]
    MetadataFormat { message: String },
    #[error("no published release found for {repo}")]
    ReleaseNotFound { repo: String },
    #[error("failed to fetch release metadata from {url}: {message}")]
    Http { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("release {version} has no downloadable archive asset")]
    NoArchiveAsset { version: String },
    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },
    #[error("checksum verification failed for {asset}: {message}")]
    Checksum { asset: String, message: String },
    #[error("failed to extract {}: {message}", .archive.display())]
    Extract { archive: PathBuf, message: String },
    #[error("no application directory found in extracted archive at {}", .dir.display())]
    ExtractedRootNotFound { dir: PathBuf },
    #[error("failed to back up {}: {message}", .install_dir.display())]
    Backup { install_dir: PathBuf, message: String },
    #[error("failed to schedule restart: {message}")]
    Handoff { message: String },
    #[error("invalid update transition from {from:?} to {to:?}")]
    InvalidTransition { from: UpdateState, to: UpdateState },
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

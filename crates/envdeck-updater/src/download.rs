use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::time::Duration;

use envdeck_core::ProgressSink;
use tracing::debug;

use crate::InstallError;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const CHUNK_SIZE: usize = 8192;

/// Fetches a release asset to a local file.
pub trait ArchiveDownloader {
    /// Writes `url` to `dest`, reporting bytes received over the advertised
    /// size. Reports `0.0` throughout when the size is unknown.
    fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, InstallError>;
}

impl<T: ArchiveDownloader + ?Sized> ArchiveDownloader for &T {
    fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, InstallError> {
        (**self).download(url, dest, progress)
    }
}

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, InstallError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("envdeck/", env!("CARGO_PKG_VERSION")))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| InstallError::Download {
                url: String::new(),
                message: format!("failed to create HTTP client: {err}"),
            })?;
        Ok(Self { client })
    }
}

impl ArchiveDownloader for HttpDownloader {
    fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, InstallError> {
        let download_err = |message: String| InstallError::Download {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| download_err(err.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let total = response.content_length().unwrap_or(0);
        debug!(url, total, "downloading");
        copy_with_progress(BufReader::new(response), dest, total, progress)
            .map_err(download_err)
    }
}

/// Streams `reader` into `dest`. Errors come back as plain messages so each
/// downloader can attach its own context.
pub fn copy_with_progress(
    mut reader: impl Read,
    dest: &Path,
    total: u64,
    progress: &mut dyn ProgressSink,
) -> Result<u64, String> {
    let mut file = File::create(dest)
        .map_err(|err| format!("failed to create {}: {err}", dest.display()))?;
    let mut buffer = [0_u8; CHUNK_SIZE];
    let mut received = 0_u64;

    progress.progress(0.0);
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| format!("failed reading response: {err}"))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|err| format!("failed writing {}: {err}", dest.display()))?;
        received += read as u64;
        if total > 0 {
            progress.progress(received as f64 / total as f64);
        }
    }
    file.flush()
        .map_err(|err| format!("failed writing {}: {err}", dest.display()))?;

    Ok(received)
}

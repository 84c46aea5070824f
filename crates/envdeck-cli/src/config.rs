use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use envdeck_updater::{ReleaseSource, DEFAULT_API_BASE};
use serde::Deserialize;

pub const DEFAULT_RELEASE_REPO: &str = "envdeck/envdeck";
const DEFAULT_OUTDATED_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RESTART_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvdeckConfig {
    pub release_repo: String,
    pub api_base: String,
    /// Directory replaced by self-update; the running executable's directory when unset.
    pub install_dir: Option<PathBuf>,
    pub default_python: PathBuf,
    /// `0` lets the outdated check run without a deadline.
    pub outdated_timeout_secs: u64,
    pub restart_delay_secs: u64,
}

impl Default for EnvdeckConfig {
    fn default() -> Self {
        Self {
            release_repo: DEFAULT_RELEASE_REPO.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            install_dir: None,
            default_python: default_python(),
            outdated_timeout_secs: DEFAULT_OUTDATED_TIMEOUT_SECS,
            restart_delay_secs: DEFAULT_RESTART_DELAY_SECS,
        }
    }
}

impl EnvdeckConfig {
    pub fn release_source(&self) -> ReleaseSource {
        ReleaseSource::new(&self.api_base, &self.release_repo)
    }

    pub fn outdated_deadline(&self) -> Option<Duration> {
        (self.outdated_timeout_secs > 0).then(|| Duration::from_secs(self.outdated_timeout_secs))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn resolve_install_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.install_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe().context("failed to resolve current executable")?;
        exe.parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("executable has no parent directory: {}", exe.display()))
    }
}

fn default_python() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "python" } else { "python3" })
}

pub fn parse_config(content: &str) -> Result<EnvdeckConfig> {
    toml::from_str(content).context("failed parsing envdeck configuration")
}

/// Missing file means defaults; anything unreadable or malformed is an error.
pub fn load_config(path: &Path) -> Result<EnvdeckConfig> {
    match fs::read_to_string(path) {
        Ok(content) => {
            parse_config(&content).with_context(|| format!("invalid config: {}", path.display()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(EnvdeckConfig::default()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config: {}", path.display()))
        }
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HOME_ENV_VAR: &str = "ENVDECK_HOME";

static TMP_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    home: PathBuf,
}

impl AppLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn registry_path(&self) -> PathBuf {
        self.home.join("environments.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }

    pub fn ensure_base_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.home)?;
        fs::create_dir_all(self.tmp_dir())
    }

    /// Creates a fresh `{prefix}-{pid}-{unix}-{n}` directory under [`Self::tmp_dir`].
    pub fn make_tmp_dir(&self, prefix: &str) -> io::Result<PathBuf> {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        let sequence = TMP_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = self.tmp_dir().join(format!(
            "{prefix}-{}-{seconds}-{sequence}",
            std::process::id()
        ));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Resolves the state root: `$ENVDECK_HOME`, then `~/.envdeck`
/// (`%LOCALAPPDATA%\Envdeck` on Windows).
pub fn default_app_home() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(HOME_ENV_VAR).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(explicit));
    }

    if cfg!(windows) {
        return std::env::var_os("LOCALAPPDATA")
            .map(|app_data| PathBuf::from(app_data).join("Envdeck"));
    }

    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".envdeck"))
}

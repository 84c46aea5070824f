use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use envdeck_core::EnvironmentRecord;
use tracing::{debug, warn};

use crate::RegistryError;

/// Why a registry file could not be used. Loading still succeeds with an
/// empty registry; the caller decides how loudly to report this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLoadIssue {
    pub path: PathBuf,
    pub reason: String,
    /// Where the unreadable file was moved, if the move succeeded.
    pub quarantined_to: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    path: PathBuf,
    records: Vec<EnvironmentRecord>,
}

impl EnvironmentRegistry {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Reads the registry at `path`. Never fails: a missing file is an empty
    /// registry, and an unreadable one is moved aside and replaced by an empty
    /// registry with a [`RegistryLoadIssue`] describing what happened.
    pub fn load(path: impl Into<PathBuf>) -> (Self, Option<RegistryLoadIssue>) {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no registry file yet");
                return (Self::empty(path), None);
            }
            Err(err) => {
                let issue = quarantine(&path, format!("failed reading registry: {err}"));
                return (Self::empty(path), Some(issue));
            }
        };

        match serde_json::from_str::<Vec<EnvironmentRecord>>(&content) {
            Ok(records) => {
                debug!(path = %path.display(), count = records.len(), "loaded registry");
                (Self { path, records }, None)
            }
            Err(err) => {
                let issue = quarantine(&path, format!("failed parsing registry: {err}"));
                (Self::empty(path), Some(issue))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[EnvironmentRecord] {
        &self.records
    }

    pub fn add(&mut self, record: EnvironmentRecord) -> Result<(), RegistryError> {
        if self.records.iter().any(|existing| existing.path == record.path) {
            return Err(RegistryError::DuplicatePath { path: record.path });
        }

        self.records.push(record);
        if let Err(err) = self.persist() {
            self.records.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Drops the record at `path` and persists. Returns `None` without
    /// touching the file when nothing is registered there.
    pub fn remove(&mut self, path: &Path) -> Result<Option<EnvironmentRecord>, RegistryError> {
        let Some(index) = self.records.iter().position(|record| record.is_at(path)) else {
            return Ok(None);
        };

        let removed = self.records.remove(index);
        if let Err(err) = self.persist() {
            self.records.insert(index, removed);
            return Err(err);
        }
        Ok(Some(removed))
    }

    pub fn find(&self, path: &Path) -> Result<&EnvironmentRecord, RegistryError> {
        self.records
            .iter()
            .find(|record| record.is_at(path))
            .ok_or_else(|| RegistryError::NotFound {
                key: path.display().to_string(),
            })
    }

    /// Looks a record up by path first, then by name.
    pub fn resolve(&self, path_or_name: &str) -> Result<&EnvironmentRecord, RegistryError> {
        let as_path = Path::new(path_or_name);
        self.records
            .iter()
            .find(|record| record.is_at(as_path))
            .or_else(|| self.records.iter().find(|record| record.name == path_or_name))
            .ok_or_else(|| RegistryError::NotFound {
                key: path_or_name.to_string(),
            })
    }

    /// Rewrites the whole registry through a sibling temp file and a rename.
    pub fn persist(&self) -> Result<(), RegistryError> {
        let persist_err = |source: io::Error| RegistryError::Persist {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persist_err)?;
        }

        let content = serde_json::to_string_pretty(&self.records)
            .map_err(|err| persist_err(io::Error::new(io::ErrorKind::InvalidData, err)))?;
        let staged = staging_path(&self.path);
        fs::write(&staged, content).map_err(persist_err)?;
        if let Err(err) = fs::rename(&staged, &self.path) {
            let _ = fs::remove_file(&staged);
            return Err(persist_err(err));
        }

        debug!(path = %self.path.display(), count = self.records.len(), "persisted registry");
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn quarantine(path: &Path, reason: String) -> RegistryLoadIssue {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{stamp}"));
    let target = path.with_file_name(name);

    let quarantined_to = match fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to move unreadable registry aside");
            None
        }
    };
    warn!(
        path = %path.display(),
        reason = %reason,
        quarantined_to = ?quarantined_to,
        "registry unreadable; starting with an empty registry"
    );

    RegistryLoadIssue {
        path: path.to_path_buf(),
        reason,
        quarantined_to,
    }
}

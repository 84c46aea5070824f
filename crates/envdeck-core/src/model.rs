use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One registered environment. `path` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub name: String,
    pub path: PathBuf,
    /// Interpreter `--version` text captured at creation or import time.
    #[serde(rename = "python_version")]
    pub interpreter_version: String,
}

impl EnvironmentRecord {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        interpreter_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            interpreter_version: interpreter_version.into(),
        }
    }

    pub fn is_at(&self, path: &Path) -> bool {
        self.path == path
    }
}

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutdatedPackage {
    pub name: String,
    #[serde(rename = "version")]
    pub current_version: String,
    pub latest_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestVersion {
    /// The outdated check has not run or failed.
    NotChecked,
    UpToDate,
    Available(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub installed_version: String,
    pub latest: LatestVersion,
}

impl PackageInfo {
    pub fn upgradable_to(&self) -> Option<&str> {
        match &self.latest {
            LatestVersion::Available(version) => Some(version),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEntry {
    pub name: String,
    /// Installed version, or [`crate::NOT_INSTALLED`].
    pub version: String,
    pub required_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub package: String,
    pub dependencies: Vec<DependencyEntry>,
    /// Installed packages that depend on `package`.
    pub required_by: Vec<String>,
}

#[derive(Debug)]
pub struct Refresh {
    pub packages: Vec<PackageInfo>,
    /// Set when the outdated check failed; `packages` are then `NotChecked`.
    pub outdated_error: Option<crate::PackageError>,
}

mod error;
mod probe;
mod provision;
mod service;
mod types;

pub use error::PackageError;
pub use probe::{
    interpreter_path, pip_path, probe_interpreter, system_python_version, UNKNOWN_VERSION,
};
pub use provision::{create_environment, import_environment};
pub use service::{
    merge_outdated, normalize_name, unchecked, PackageService, DEFAULT_OUTDATED_DEADLINE,
    NOT_INSTALLED,
};
pub use types::{
    DependencyEntry, DependencyReport, InstalledPackage, LatestVersion, OutdatedPackage,
    PackageInfo, Refresh,
};

#[cfg(test)]
mod tests;

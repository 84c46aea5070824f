mod backup;
mod error;
mod store;

pub use backup::backup_environment;
pub use error::RegistryError;
pub use store::{EnvironmentRegistry, RegistryLoadIssue};

#[cfg(test)]
mod tests;

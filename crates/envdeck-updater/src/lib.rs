mod backup;
mod download;
mod error;
mod extract;
mod fetch;
mod handoff;
mod installer;

pub use backup::{backup_installation, BACKUP_PREFIX};
pub use download::{copy_with_progress, ArchiveDownloader, HttpDownloader};
pub use error::{FetchError, InstallError};
pub use extract::{extract_archive, locate_extracted_root};
pub use fetch::{
    check_for_update, check_for_update_with_fetcher, decide_update, parse_release_metadata,
    ReleaseAsset, ReleaseMetadata, ReleaseSource, UpdateDecision, DEFAULT_API_BASE,
};
pub use handoff::{restart_script, script_path_for, spawn_restart_helper, Relaunch, RestartPlan};
pub use installer::{
    apply_update, apply_update_with_hooks, UpdateObserver, UpdateOutcome, UpdatePlan,
    UpdateState, DEFAULT_RESTART_DELAY,
};

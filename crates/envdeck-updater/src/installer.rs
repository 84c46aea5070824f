use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use envdeck_core::{AppLayout, MonotonicProgress, NullSink, ProgressSink};
use envdeck_security::{parse_checksum_line, sha256_file_hex};
use tracing::{info, warn};

use crate::backup::backup_installation;
use crate::download::ArchiveDownloader;
use crate::extract::{extract_archive, locate_extracted_root};
use crate::handoff::{spawn_restart_helper, Relaunch, RestartPlan};
use crate::{InstallError, ReleaseAsset, UpdateDecision};

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Downloading,
    Extracting,
    BackingUp,
    Swapping,
    RestartScheduled,
    Failed,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::BackingUp => "backing-up",
            Self::Swapping => "swapping",
            Self::RestartScheduled => "restart-scheduled",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use UpdateState::*;
        matches!(
            (self, next),
            (Idle, Downloading)
                | (Downloading, Extracting)
                | (Extracting, BackingUp)
                | (BackingUp, Swapping)
                | (Swapping, RestartScheduled)
                | (Downloading | Extracting | BackingUp | Swapping, Failed)
        )
    }
}

/// Receives state changes and per-phase progress. Progress restarts at zero
/// after every state change.
pub trait UpdateObserver {
    fn state_changed(&mut self, state: UpdateState);
    fn progress(&mut self, fraction: f64);
}

impl UpdateObserver for NullSink {
    fn state_changed(&mut self, _state: UpdateState) {}
    fn progress(&mut self, _fraction: f64) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub version: String,
    pub asset: ReleaseAsset,
    pub checksum: Option<ReleaseAsset>,
    pub install_dir: PathBuf,
    pub relaunch: Relaunch,
    pub restart_delay: Duration,
}

impl UpdatePlan {
    /// Picks the first archive asset of `decision`; refuses releases without one.
    pub fn from_decision(
        decision: &UpdateDecision,
        install_dir: impl Into<PathBuf>,
        relaunch: Relaunch,
    ) -> Result<Self, InstallError> {
        let asset = decision
            .archive_asset()
            .ok_or_else(|| InstallError::NoArchiveAsset {
                version: decision.latest_version.clone(),
            })?;
        Ok(Self {
            version: decision.latest_version.clone(),
            asset: asset.clone(),
            checksum: decision.checksum_for(asset).cloned(),
            install_dir: install_dir.into(),
            relaunch,
            restart_delay: DEFAULT_RESTART_DELAY,
        })
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }
}

/// Temporary state of one update attempt.
#[derive(Debug)]
struct UpdateSession {
    state: UpdateState,
    temp_dir: PathBuf,
}

impl UpdateSession {
    fn new(temp_dir: PathBuf) -> Self {
        Self {
            state: UpdateState::Idle,
            temp_dir,
        }
    }

    fn advance(
        &mut self,
        next: UpdateState,
        observer: &mut dyn UpdateObserver,
    ) -> Result<(), InstallError> {
        if !self.state.can_transition_to(next) {
            return Err(InstallError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!(from = self.state.as_str(), to = next.as_str(), "update state change");
        self.state = next;
        observer.state_changed(next);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub version: String,
    pub backup_dir: PathBuf,
    pub extracted_root: PathBuf,
    pub script_path: Option<PathBuf>,
}

struct PhaseProgress<'a>(&'a mut dyn UpdateObserver);

impl ProgressSink for PhaseProgress<'_> {
    fn progress(&mut self, fraction: f64) {
        self.0.progress(fraction);
    }
}

pub fn apply_update<D: ArchiveDownloader>(
    layout: &AppLayout,
    downloader: &D,
    plan: &UpdatePlan,
    observer: &mut dyn UpdateObserver,
) -> Result<UpdateOutcome, InstallError> {
    apply_update_with_hooks(
        layout,
        downloader,
        plan,
        observer,
        backup_installation,
        |restart| spawn_restart_helper(restart).map(Some),
    )
}

/// Runs the update with injectable backup and handoff steps. On any failure
/// the session directory is removed and the installation is left as it was.
pub fn apply_update_with_hooks<D, B, H>(
    layout: &AppLayout,
    downloader: &D,
    plan: &UpdatePlan,
    observer: &mut dyn UpdateObserver,
    backup: B,
    handoff: H,
) -> Result<UpdateOutcome, InstallError>
where
    D: ArchiveDownloader,
    B: FnOnce(&Path) -> Result<PathBuf, InstallError>,
    H: FnOnce(&RestartPlan) -> Result<Option<PathBuf>, InstallError>,
{
    let temp_dir = layout
        .make_tmp_dir("update")
        .map_err(|source| InstallError::Io {
            action: "create update directory",
            path: layout.tmp_dir(),
            source,
        })?;
    let mut session = UpdateSession::new(temp_dir);

    match run_session(&mut session, downloader, plan, observer, backup, handoff) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(state = session.state.as_str(), error = %err, "update failed");
            if session.state != UpdateState::Idle {
                session.state = UpdateState::Failed;
                observer.state_changed(UpdateState::Failed);
            }
            if let Err(cleanup) = fs::remove_dir_all(&session.temp_dir) {
                warn!(
                    dir = %session.temp_dir.display(),
                    error = %cleanup,
                    "failed to remove update directory"
                );
            }
            Err(err)
        }
    }
}

fn run_session<D, B, H>(
    session: &mut UpdateSession,
    downloader: &D,
    plan: &UpdatePlan,
    observer: &mut dyn UpdateObserver,
    backup: B,
    handoff: H,
) -> Result<UpdateOutcome, InstallError>
where
    D: ArchiveDownloader,
    B: FnOnce(&Path) -> Result<PathBuf, InstallError>,
    H: FnOnce(&RestartPlan) -> Result<Option<PathBuf>, InstallError>,
{
    let archive_type = plan
        .asset
        .archive_type()
        .ok_or_else(|| InstallError::NoArchiveAsset {
            version: plan.version.clone(),
        })?;

    session.advance(UpdateState::Downloading, observer)?;
    let archive_path = session_file(&session.temp_dir, &plan.asset)?;
    downloader.download(
        &plan.asset.download_url,
        &archive_path,
        &mut MonotonicProgress::new(PhaseProgress(&mut *observer)),
    )?;
    if let Some(checksum) = &plan.checksum {
        verify_archive(downloader, &session.temp_dir, &archive_path, checksum)?;
    }

    session.advance(UpdateState::Extracting, observer)?;
    let extract_dir = session.temp_dir.join("extracted");
    extract_archive(
        &archive_path,
        &extract_dir,
        archive_type,
        &mut MonotonicProgress::new(PhaseProgress(&mut *observer)),
    )?;
    let extracted_root = locate_extracted_root(&extract_dir)?;

    session.advance(UpdateState::BackingUp, observer)?;
    let backup_dir = backup(&plan.install_dir)?;

    session.advance(UpdateState::Swapping, observer)?;
    let script_path = handoff(&RestartPlan {
        extracted_root: extracted_root.clone(),
        install_dir: plan.install_dir.clone(),
        session_dir: session.temp_dir.clone(),
        relaunch: plan.relaunch.clone(),
        delay: plan.restart_delay,
    })?;

    session.advance(UpdateState::RestartScheduled, observer)?;
    Ok(UpdateOutcome {
        version: plan.version.clone(),
        backup_dir,
        extracted_root,
        script_path,
    })
}

fn verify_archive<D: ArchiveDownloader>(
    downloader: &D,
    temp_dir: &Path,
    archive_path: &Path,
    checksum: &ReleaseAsset,
) -> Result<(), InstallError> {
    let checksum_err = |message: String| InstallError::Checksum {
        asset: checksum.name.clone(),
        message,
    };

    let sidecar = session_file(temp_dir, checksum)?;
    downloader.download(&checksum.download_url, &sidecar, &mut NullSink)?;
    let content = fs::read_to_string(&sidecar)
        .map_err(|err| checksum_err(format!("failed to read checksum file: {err}")))?;
    let expected = parse_checksum_line(&content).map_err(|err| checksum_err(format!("{err:#}")))?;
    let actual = sha256_file_hex(archive_path).map_err(|err| checksum_err(format!("{err:#}")))?;

    if actual != expected {
        return Err(checksum_err(format!("expected {expected}, got {actual}")));
    }
    info!(asset = %checksum.name, "archive checksum verified");
    Ok(())
}

/// Asset names come from remote metadata; only their final component is used.
fn session_file(temp_dir: &Path, asset: &ReleaseAsset) -> Result<PathBuf, InstallError> {
    let file_name = Path::new(&asset.name)
        .file_name()
        .ok_or_else(|| InstallError::Download {
            url: asset.download_url.clone(),
            message: format!("asset name '{}' is not a file name", asset.name),
        })?;
    Ok(temp_dir.join(file_name))
}

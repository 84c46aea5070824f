mod archive;
mod events;
mod layout;
mod model;
mod process;
mod tree;
mod version;

pub use archive::ArchiveType;
pub use events::{
    spawn_operation, LineSink, MonotonicProgress, NullSink, OperationEvent, OperationHandle,
    OperationReporter, ProgressSink,
};
pub use layout::{default_app_home, AppLayout, HOME_ENV_VAR};
pub use model::EnvironmentRecord;
pub use process::{
    first_existing, run_process, CommandRunner, ExitResult, Invocation, OutputMode, ProcessError,
    SystemRunner,
};
pub use tree::{copy_tree, CopyTreeError};
pub use version::{compare_versions, is_newer, DottedVersion, VersionParseError};

//! CLI command implementations

pub mod browse;
pub mod folder;
pub mod sync;
pub mod update;
pub mod watch;

pub use browse::BrowseArgs;
pub use folder::{AddArgs, CloneArgs, EditArgs, RemoveArgs};
pub use sync::{BranchesArgs, CommitArgs, PullArgs, SwitchArgs};
pub use update::UpdateArgs;
pub use watch::WatchArgs;

//! gitwatch core - folder watching and git synchronization
//!
//! This crate watches local project folders, tracks which ones have
//! uncommitted changes, and synchronizes them with remote repositories:
//! commit, push, pull, branch switching and branch/upstream reconciliation.
//! It also carries the self-update bootstrapper.

pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod sync;
pub mod update;
pub mod watch;

pub use config::{Config, NetworkConfig, StateConfig, UpdateConfig, WatchConfig};
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use git::{clone_repo, Backend, CloneOptions, GitRepo, RepoUrl, ORIGIN};
pub use reconcile::{reconcile, select_branch, BranchAction, ReconcileOutcome};
pub use registry::{
    DirtyFlag, FolderEntry, FolderMeta, PersistedConfig, Registry, StateStore, WatchedFolder,
};
pub use service::{AddFolderOptions, CloneRequest, FolderUpdate, FolderUpdateReport, SyncService};
pub use sync::{BranchListing, CommitOutcome, CommitReport, PullReport, PushOutcome, SwitchOutcome};
pub use update::{ApplyReport, StagedUpdate, UpdateCheck, Updater, CURRENT_VERSION};
pub use watch::{FolderChange, WatchHandle, WatchManager};

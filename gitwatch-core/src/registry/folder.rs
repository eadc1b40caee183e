//! Registry entries for watched folders

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::store::FolderRecord;
use crate::git::GitRepo;

/// Branch a folder syncs when none is configured
pub const DEFAULT_BRANCH: &str = "main";

/// Folder settings and sync bookkeeping, guarded by a short-lived lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMeta {
    pub display_name: String,
    pub remote_url: Option<String>,
    pub branch: String,
    pub auto_push: bool,
    pub last_commit: Option<DateTime<Utc>>,
}

impl FolderMeta {
    /// Settings for a newly added folder
    pub fn new(display_name: impl Into<String>, remote_url: Option<String>, branch: Option<String>) -> Self {
        Self {
            display_name: display_name.into(),
            remote_url: remote_url.filter(|u| !u.trim().is_empty()),
            branch: normalize_branch(branch),
            auto_push: true,
            last_commit: None,
        }
    }
}

/// Blank or missing branch names fall back to [`DEFAULT_BRANCH`]
pub(crate) fn normalize_branch(branch: Option<String>) -> String {
    branch
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

/// Dirty flag shared between a folder and its watcher
///
/// Every observed change bumps a generation counter before setting the flag,
/// so a clear can be made conditional on no change having landed since a
/// given generation was read.
#[derive(Debug, Default)]
pub struct DirtyFlag {
    dirty: AtomicBool,
    generation: AtomicU64,
}

impl DirtyFlag {
    pub fn new(dirty: bool) -> Self {
        Self {
            dirty: AtomicBool::new(dirty),
            generation: AtomicU64::new(0),
        }
    }

    /// Record an observed change
    pub fn mark(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Number of changes marked so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Overwrite the flag regardless of observed changes
    pub fn set(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }

    /// Store `dirty` unless a change was marked after generation `seen`
    ///
    /// Returns whether the value was stored. A change racing with the store
    /// wins and leaves the flag set.
    pub fn set_unless_changed(&self, seen: u64, dirty: bool) -> bool {
        if self.generation() != seen {
            return false;
        }
        self.dirty.store(dirty, Ordering::SeqCst);
        if self.generation() != seen {
            self.dirty.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }
}

/// Handle to a folder's repository; holding the lock serializes operations on the folder
pub type RepoSlot = Arc<tokio::sync::Mutex<Option<GitRepo>>>;

/// One watched folder in the registry
///
/// State is split by how it is accessed: settings behind a std mutex, the
/// dirty flag as an atomic shared with the watcher thread, and the repository
/// behind an async mutex that doubles as the folder's operation lock.
///
/// An entry also remembers whether it was edited locally since the last
/// save (`pending`) and which dirty generation that save wrote (`synced`),
/// so saving can merge with what other processes wrote in between.
#[derive(Debug)]
pub struct FolderEntry {
    path: PathBuf,
    meta: Mutex<FolderMeta>,
    dirty: Arc<DirtyFlag>,
    repo: RepoSlot,
    pending: AtomicBool,
    synced: AtomicU64,
}

fn meta_from_record(path: &Path, record: &FolderRecord, last_commit: Option<DateTime<Utc>>) -> FolderMeta {
    let display_name = if record.folder_name.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        record.folder_name.clone()
    };

    FolderMeta {
        display_name,
        remote_url: Some(record.remote_url.clone()).filter(|u| !u.is_empty()),
        branch: normalize_branch(Some(record.branch.clone())),
        auto_push: record.auto_push,
        last_commit,
    }
}

impl FolderEntry {
    /// A new entry, not yet saved
    pub fn new(path: PathBuf, meta: FolderMeta, repo: Option<GitRepo>, dirty: bool) -> Self {
        Self {
            path,
            meta: Mutex::new(meta),
            dirty: Arc::new(DirtyFlag::new(dirty)),
            repo: Arc::new(tokio::sync::Mutex::new(repo)),
            pending: AtomicBool::new(true),
            synced: AtomicU64::new(0),
        }
    }

    /// Rebuild an entry from its persisted record
    pub(crate) fn from_record(path: PathBuf, record: FolderRecord, repo: Option<GitRepo>) -> Self {
        let last_commit = repo
            .as_ref()
            .and_then(|r| r.head_commit_time().ok().flatten());
        let meta = meta_from_record(&path, &record, last_commit);

        let entry = Self::new(path, meta, repo, record.changes);
        entry.pending.store(false, Ordering::SeqCst);
        entry
    }

    /// Take on settings another process saved
    ///
    /// The saved dirty bit is adopted only if no change was observed here
    /// since the last save. Returns the record as it should now be written.
    pub(crate) fn adopt(&self, record: FolderRecord) -> FolderRecord {
        let synced = self.synced.load(Ordering::SeqCst);
        let changes = if self.dirty.set_unless_changed(synced, record.changes) {
            record.changes
        } else {
            true
        };

        let mut meta = self
            .meta
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *meta = meta_from_record(&self.path, &record, meta.last_commit);

        FolderRecord { changes, ..record }
    }

    /// Clear the local-edit mark, returning whether it was set
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn mark_pending(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Remember the dirty generation that was just written
    pub(crate) fn mark_synced(&self, generation: u64) {
        self.synced.store(generation, Ordering::SeqCst);
    }

    /// Persisted projection of this entry
    pub(crate) fn to_record(&self) -> FolderRecord {
        let meta = self.meta();
        FolderRecord {
            repo_path: self.path.to_string_lossy().into_owned(),
            folder_name: meta.display_name,
            remote_url: meta.remote_url.unwrap_or_default(),
            branch: meta.branch,
            auto_push: meta.auto_push,
            changes: self.is_dirty(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current settings
    pub fn meta(&self) -> FolderMeta {
        self.meta
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Mutate the settings in place
    pub fn update_meta<R>(&self, f: impl FnOnce(&mut FolderMeta) -> R) -> R {
        let mut meta = self
            .meta
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = f(&mut meta);
        self.mark_pending();
        result
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_set()
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
        self.mark_pending();
    }

    /// Generation of the dirty flag; pass it to [`Self::clear_dirty_since`]
    pub fn change_generation(&self) -> u64 {
        self.dirty.generation()
    }

    /// Clear the dirty flag unless a change was observed after `generation`
    pub fn clear_dirty_since(&self, generation: u64) -> bool {
        let cleared = self.dirty.set_unless_changed(generation, false);
        self.mark_pending();
        cleared
    }

    /// The flag shared with this folder's watcher
    pub fn dirty_flag(&self) -> Arc<DirtyFlag> {
        Arc::clone(&self.dirty)
    }

    /// The repository slot; lock it before touching the repository
    pub fn repo_slot(&self) -> RepoSlot {
        Arc::clone(&self.repo)
    }

    /// Value snapshot for callers
    pub fn snapshot(&self) -> WatchedFolder {
        let meta = self.meta();
        // A held lock means an operation is running on an open repository
        let repo_open = self.repo.try_lock().map(|r| r.is_some()).unwrap_or(true);

        WatchedFolder {
            path: self.path.clone(),
            display_name: meta.display_name,
            remote_url: meta.remote_url,
            branch: meta.branch,
            auto_push: meta.auto_push,
            dirty: self.is_dirty(),
            last_commit: meta.last_commit,
            repo_open,
        }
    }
}

/// Point-in-time view of a watched folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFolder {
    pub path: PathBuf,
    pub display_name: String,
    pub remote_url: Option<String>,
    pub branch: String,
    pub auto_push: bool,
    /// Changes observed since the last successful commit
    pub dirty: bool,
    pub last_commit: Option<DateTime<Utc>>,
    /// Whether the directory opened as a repository
    pub repo_open: bool,
}

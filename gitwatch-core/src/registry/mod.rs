//! Folder registry: the table of watched folders and its persistence
//!
//! The registry is the single source of truth for folder settings and dirty
//! flags. The map itself sits behind a short-lived `RwLock`; per-folder
//! operations lock the folder's own repository slot instead.
//!
//! Several processes may share one state file, so saving merges this
//! registry with the file's current contents rather than overwriting it.

mod folder;
mod store;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub use folder::{DirtyFlag, FolderEntry, FolderMeta, RepoSlot, WatchedFolder, DEFAULT_BRANCH};
pub(crate) use folder::normalize_branch;
pub use store::{FolderRecord, PersistedConfig, StateLock, StateStore};

use crate::git::GitRepo;
use crate::{Error, Result};

/// Outcome of merging the registry with the saved state
#[derive(Debug, Default)]
pub(crate) struct Merge {
    /// What to write back
    pub config: PersistedConfig,
    /// Folders another process registered, now present here
    pub adopted: Vec<Arc<FolderEntry>>,
    /// Folders another process removed, now gone from here
    pub dropped: Vec<Arc<FolderEntry>>,
    synced: Vec<(Arc<FolderEntry>, u64)>,
    pending: Vec<Arc<FolderEntry>>,
}

impl Merge {
    /// The merged config was written
    pub fn written(self) {
        for (entry, generation) in self.synced {
            entry.mark_synced(generation);
        }
    }

    /// The merged config could not be written; keep local edits for the next save
    pub fn failed(self) {
        for entry in self.pending {
            entry.mark_pending();
        }
    }
}

/// In-memory table of watched folders
#[derive(Debug, Default)]
pub struct Registry {
    folders: RwLock<HashMap<PathBuf, Arc<FolderEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted records, reopening each repository
    ///
    /// A folder whose repository fails to open stays registered without a
    /// handle.
    pub fn from_config(config: PersistedConfig, open: impl Fn(&Path) -> Result<GitRepo>) -> Self {
        let registry = Self::new();

        for (key, record) in config.watched_folders {
            let path = PathBuf::from(&key);
            let repo = match open(&path) {
                Ok(repo) => Some(repo),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Could not open repository: {}", e);
                    None
                }
            };

            let entry = FolderEntry::from_record(path, record, repo);
            if let Err(e) = registry.insert(entry) {
                tracing::warn!("Skipping duplicate state entry: {}", e);
            }
        }

        registry
    }

    /// Persisted projection of every entry
    pub fn to_config(&self) -> PersistedConfig {
        let mut config = PersistedConfig::default();
        for entry in self.entries() {
            config
                .watched_folders
                .insert(entry.path().to_string_lossy().into_owned(), entry.to_record());
        }
        config
    }

    /// Merge with the saved state `disk` (`None` when it is unreadable)
    ///
    /// Entries edited here since the last save win. Other entries take the
    /// saved settings, and keep their dirty bit only for changes observed
    /// since the last save. Entries only on disk are added unless listed in
    /// `removed`; entries no longer on disk are dropped unless new here.
    pub(crate) fn merge(
        &self,
        disk: Option<PersistedConfig>,
        removed: &HashSet<PathBuf>,
        open: impl Fn(&Path) -> Result<GitRepo>,
    ) -> Merge {
        let authoritative = disk.is_some();
        let mut on_disk = disk.map(|d| d.watched_folders).unwrap_or_default();
        let mut merge = Merge::default();

        for entry in self.entries() {
            let key = entry.path().to_string_lossy().into_owned();
            let saved = on_disk.remove(&key);
            let generation = entry.change_generation();

            let record = if entry.take_pending() {
                merge.pending.push(Arc::clone(&entry));
                entry.to_record()
            } else if let Some(record) = saved {
                entry.adopt(record)
            } else if authoritative {
                self.remove(entry.path());
                merge.dropped.push(entry);
                continue;
            } else {
                entry.to_record()
            };

            merge.config.watched_folders.insert(key, record);
            merge.synced.push((entry, generation));
        }

        for (key, record) in on_disk {
            let path = PathBuf::from(&key);
            if removed.contains(&path) {
                continue;
            }
            let repo = match open(&path) {
                Ok(repo) => Some(repo),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Could not open repository: {}", e);
                    None
                }
            };
            match self.insert(FolderEntry::from_record(path, record.clone(), repo)) {
                Ok(entry) => {
                    merge.config.watched_folders.insert(key, record);
                    merge.synced.push((Arc::clone(&entry), entry.change_generation()));
                    merge.adopted.push(entry);
                }
                Err(e) => tracing::warn!("Skipping state entry: {}", e),
            }
        }

        merge
    }

    pub fn get(&self, path: &Path) -> Option<Arc<FolderEntry>> {
        self.read().get(path).cloned()
    }

    /// Look up a folder or fail with [`Error::FolderNotFound`]
    pub fn require(&self, path: &Path) -> Result<Arc<FolderEntry>> {
        self.get(path)
            .ok_or_else(|| Error::FolderNotFound(path.to_path_buf()))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read().contains_key(path)
    }

    /// Add an entry; paths are unique
    pub fn insert(&self, entry: FolderEntry) -> Result<Arc<FolderEntry>> {
        let mut folders = self
            .folders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if folders.contains_key(entry.path()) {
            return Err(Error::FolderExists(entry.path().to_path_buf()));
        }

        let entry = Arc::new(entry);
        folders.insert(entry.path().to_path_buf(), Arc::clone(&entry));
        Ok(entry)
    }

    pub fn remove(&self, path: &Path) -> Option<Arc<FolderEntry>> {
        self.folders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path)
    }

    /// All entries, ordered by path
    pub fn entries(&self) -> Vec<Arc<FolderEntry>> {
        let mut entries: Vec<_> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| a.path().cmp(b.path()));
        entries
    }

    /// Snapshots of all entries, ordered by path
    pub fn snapshot(&self) -> Vec<WatchedFolder> {
        self.entries().iter().map(|e| e.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Arc<FolderEntry>>> {
        self.folders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_support::init_repo_with_commit;
    use tempfile::TempDir;

    fn entry(path: &str) -> FolderEntry {
        FolderEntry::new(PathBuf::from(path), FolderMeta::new("x", None, None), None, false)
    }

    #[test]
    fn test_paths_are_unique() {
        let registry = Registry::new();
        registry.insert(entry("/a")).unwrap();
        let err = registry.insert(entry("/a")).unwrap_err();
        assert!(matches!(err, Error::FolderExists(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entries_sorted_and_removable() {
        let registry = Registry::new();
        registry.insert(entry("/b")).unwrap();
        registry.insert(entry("/a")).unwrap();

        let paths: Vec<_> = registry.snapshot().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);

        assert!(registry.remove(Path::new("/a")).is_some());
        assert!(registry.remove(Path::new("/a")).is_none());
        assert!(matches!(
            registry.require(Path::new("/a")),
            Err(Error::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_from_config_keeps_unopenable_folders() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good");
        std::fs::create_dir(&good).unwrap();
        init_repo_with_commit(&good);
        let missing = temp.path().join("missing");

        let mut config = PersistedConfig::default();
        for path in [&good, &missing] {
            let key = path.to_string_lossy().into_owned();
            config.watched_folders.insert(
                key.clone(),
                FolderRecord {
                    repo_path: key,
                    folder_name: String::new(),
                    remote_url: String::new(),
                    branch: "main".into(),
                    auto_push: true,
                    changes: false,
                },
            );
        }

        let registry = Registry::from_config(config.clone(), |p| GitRepo::open(p));
        assert_eq!(registry.len(), 2);

        let good_folder = registry.get(&good).unwrap().snapshot();
        assert!(good_folder.repo_open);
        assert!(good_folder.last_commit.is_some());
        assert_eq!(good_folder.display_name, "good");
        assert!(!registry.get(&missing).unwrap().snapshot().repo_open);

        // Display names are filled in from the directory name on the way back out
        let saved = registry.to_config();
        assert_eq!(saved.watched_folders.len(), 2);
        assert_eq!(
            saved.watched_folders[&missing.to_string_lossy().into_owned()].folder_name,
            "missing"
        );
    }

    fn record(path: &str, changes: bool) -> FolderRecord {
        FolderRecord {
            repo_path: path.into(),
            folder_name: String::new(),
            remote_url: String::new(),
            branch: "main".into(),
            auto_push: true,
            changes,
        }
    }

    fn no_repo(path: &Path) -> Result<GitRepo> {
        Err(Error::FolderNotFound(path.to_path_buf()))
    }

    #[test]
    fn test_merge_takes_folders_from_both_sides() {
        let mut saved = PersistedConfig::default();
        saved.watched_folders.insert("/a".into(), record("/a", false));
        let registry = Registry::from_config(saved.clone(), no_repo);

        // Added here, not yet saved
        registry.insert(entry("/mine")).unwrap();
        // Added by another process
        saved.watched_folders.insert("/theirs".into(), record("/theirs", true));

        let merge = registry.merge(Some(saved), &HashSet::new(), no_repo);
        let keys: Vec<_> = merge.config.watched_folders.keys().cloned().collect();
        assert_eq!(keys, vec!["/a", "/mine", "/theirs"]);
        assert_eq!(merge.adopted.len(), 1);
        assert!(merge.dropped.is_empty());
        merge.written();

        assert!(registry.get(Path::new("/theirs")).unwrap().is_dirty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_merge_honors_removals() {
        let mut saved = PersistedConfig::default();
        saved.watched_folders.insert("/a".into(), record("/a", false));
        saved.watched_folders.insert("/b".into(), record("/b", false));
        let registry = Registry::from_config(saved.clone(), no_repo);

        // Removed here
        registry.remove(Path::new("/a"));
        let removed: HashSet<PathBuf> = [PathBuf::from("/a")].into();
        // Removed elsewhere
        saved.watched_folders.remove("/b");
        saved.watched_folders.insert("/a".into(), record("/a", false));

        let merge = registry.merge(Some(saved), &removed, no_repo);
        assert!(merge.config.watched_folders.is_empty());
        assert_eq!(merge.dropped.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_merge_local_edits_win() {
        let mut saved = PersistedConfig::default();
        saved.watched_folders.insert("/a".into(), record("/a", true));
        let registry = Registry::from_config(saved.clone(), no_repo);

        let a = registry.get(Path::new("/a")).unwrap();
        a.clear_dirty_since(a.change_generation());
        a.update_meta(|m| m.branch = "dev".into());

        let merge = registry.merge(Some(saved.clone()), &HashSet::new(), no_repo);
        let written = &merge.config.watched_folders["/a"];
        assert!(!written.changes);
        assert_eq!(written.branch, "dev");
        merge.written();

        // Once saved, the file is authoritative again
        let mut theirs = saved;
        theirs.watched_folders.get_mut("/a").unwrap().branch = "release".into();
        let merge = registry.merge(Some(theirs), &HashSet::new(), no_repo);
        assert_eq!(merge.config.watched_folders["/a"].branch, "release");
        assert_eq!(a.meta().branch, "release");
    }

    #[test]
    fn test_merge_with_unreadable_state_keeps_everything() {
        let mut saved = PersistedConfig::default();
        saved.watched_folders.insert("/a".into(), record("/a", false));
        let registry = Registry::from_config(saved, no_repo);

        let merge = registry.merge(None, &HashSet::new(), no_repo);
        assert_eq!(merge.config.watched_folders.len(), 1);
        assert_eq!(registry.len(), 1);
    }
}

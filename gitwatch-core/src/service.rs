//! Service facade over the registry, watchers, sync engine and updater
//!
//! Every repository operation runs on a blocking task while holding the
//! folder's lock, bounded by the configured git timeout. The lock guard is
//! moved into the task, so a timed-out operation keeps the folder locked
//! until it actually finishes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::credentials::Credentials;
use crate::git::{clone_dir_name, clone_repo, expand_shorthand, CloneOptions, GitRepo, ORIGIN};
use crate::reconcile::{reconcile, select_branch};
use crate::registry::{
    normalize_branch, FolderEntry, FolderMeta, Registry, StateStore, WatchedFolder,
};
use crate::sync::{
    self, default_commit_message, BranchListing, CommitOutcome, CommitReport, PullReport,
    SwitchOutcome,
};
use crate::update::{ApplyReport, StagedUpdate, UpdateCheck, Updater};
use crate::watch::{FolderChange, WatchManager};
use crate::{Error, Result};

/// How to register a folder
#[derive(Debug, Clone, Default)]
pub struct AddFolderOptions {
    /// Defaults to the directory name
    pub display_name: Option<String>,
    pub remote_url: Option<String>,
    /// Defaults to `main`
    pub branch: Option<String>,
    /// Initialize a repository if the folder is not one yet
    pub init: bool,
}

/// How to clone a repository into a new folder
#[derive(Debug, Clone, Default)]
pub struct CloneRequest {
    /// Branch to check out; the remote's default branch otherwise
    pub branch: Option<String>,
    /// Replace an existing directory at the clone target
    pub overwrite: bool,
}

/// Settings to change on a folder; `None` leaves a field as it is
#[derive(Debug, Clone, Default)]
pub struct FolderUpdate {
    pub display_name: Option<String>,
    pub branch: Option<String>,
    /// An empty string removes the remote URL
    pub remote_url: Option<String>,
    pub auto_push: Option<bool>,
}

/// Result of [`SyncService::update_folder`]
#[derive(Debug, Clone)]
pub struct FolderUpdateReport {
    pub folder: WatchedFolder,
    /// Repository changes that failed; the settings were saved regardless
    pub warnings: Vec<String>,
}

/// Open a folder's repository with the service's credentials and timeout
fn open_repo(path: &Path, credentials: &Credentials, timeout: Duration) -> Result<GitRepo> {
    Ok(GitRepo::open(path)?
        .with_credentials(credentials.clone())
        .with_network_timeout(timeout))
}

/// Canonical registry key for a user-supplied path
fn folder_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn dir_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Owns all folder state and exposes the public operations
#[derive(Debug)]
pub struct SyncService {
    config: Config,
    credentials: Credentials,
    registry: Registry,
    store: StateStore,
    watches: WatchManager,
    /// Folders removed here since the last save
    removed: Mutex<HashSet<PathBuf>>,
    changes: Mutex<Option<UnboundedReceiver<FolderChange>>>,
    watching: AtomicBool,
    updater: Updater,
}

impl SyncService {
    /// Load the persisted registry and reopen every folder's repository
    ///
    /// An unreadable state file is moved aside and replaced by an empty
    /// registry.
    pub fn open(config: Config, credentials: Credentials) -> Self {
        let store = StateStore::new(&config.state.path);
        let persisted = match store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(path = %store.path().display(), "Could not load state, starting empty: {}", e);
                match store.quarantine() {
                    Ok(moved) => warn!(path = %moved.display(), "Kept unreadable state file"),
                    Err(e) => warn!("Could not move unreadable state file: {}", e),
                }
                Default::default()
            }
        };

        let timeout = config.network.git_timeout;
        let registry =
            Registry::from_config(persisted, |path| open_repo(path, &credentials, timeout));
        info!(folders = registry.len(), "Registry loaded");

        let (watches, changes) = WatchManager::new(config.watch.debounce);
        let updater = Updater::new(config.update.clone(), timeout);

        Self {
            config,
            credentials,
            registry,
            store,
            watches,
            removed: Mutex::new(HashSet::new()),
            changes: Mutex::new(Some(changes)),
            watching: AtomicBool::new(false),
            updater,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Receiver of change notifications; can be taken once
    pub fn take_changes(&self) -> Option<UnboundedReceiver<FolderChange>> {
        self.changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Merge the registry with the state file and write the result
    ///
    /// Other processes may have saved since this one loaded. Their added,
    /// removed and edited folders are taken over, and folders edited here
    /// since the last save keep this process's version.
    pub fn save(&self) -> Result<()> {
        let _lock = self.store.lock()?;

        let disk = match self.store.load() {
            Ok(disk) => Some(disk),
            Err(e) => {
                warn!(path = %self.store.path().display(), "Overwriting unreadable state: {}", e);
                None
            }
        };

        let removed = std::mem::take(&mut *self.lock_removed());
        let timeout = self.config.network.git_timeout;
        let merge = self
            .registry
            .merge(disk, &removed, |path| open_repo(path, &self.credentials, timeout));

        for entry in &merge.dropped {
            self.watches.unwatch(entry.path());
            info!(folder = %entry.path().display(), "Folder removed by another process");
        }
        for entry in &merge.adopted {
            self.watch_entry(entry);
            info!(folder = %entry.path().display(), "Folder added by another process");
        }

        match self.store.save(&merge.config) {
            Ok(()) => {
                merge.written();
                Ok(())
            }
            Err(e) => {
                merge.failed();
                self.lock_removed().extend(removed);
                Err(e)
            }
        }
    }

    fn lock_removed(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.removed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Save, logging instead of failing; used after operations that already succeeded
    fn persist(&self) {
        if let Err(e) = self.save() {
            error!(path = %self.store.path().display(), "Failed to save state: {}", e);
        }
    }

    /// Run `f` on a blocking task, bounded by the git timeout
    async fn blocking<T, F>(&self, operation: String, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let timeout = self.config.network.git_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Other(format!("{} failed: {}", operation, e))),
            Err(_) => {
                warn!(operation = %operation, ?timeout, "Operation timed out");
                Err(Error::Timeout {
                    operation,
                    after: timeout,
                })
            }
        }
    }

    /// Run `f` against the folder's repository under its lock
    ///
    /// A folder whose repository failed to open earlier is reopened first.
    async fn with_repo<T, F>(&self, entry: &FolderEntry, operation: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&GitRepo) -> Result<T> + Send + 'static,
    {
        let mut guard = entry.repo_slot().lock_owned().await;
        let path = entry.path().to_path_buf();
        let credentials = self.credentials.clone();
        let timeout = self.config.network.git_timeout;

        debug!(folder = %path.display(), operation, "Starting operation");
        let label = format!("{} in {}", operation, path.display());
        self.blocking(label, move || {
            if guard.is_none() {
                *guard = Some(open_repo(&path, &credentials, timeout)?);
            }
            match guard.as_ref() {
                Some(repo) => f(repo),
                None => Err(Error::Config(format!(
                    "Not a git repository: {}",
                    path.display()
                ))),
            }
        })
        .await
    }

    /// Start watching `entry` if watchers are running
    fn watch_entry(&self, entry: &FolderEntry) {
        if !self.watching.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.watches.watch(entry.path(), entry.dirty_flag()) {
            warn!(folder = %entry.path().display(), "Folder stays unwatched: {}", e);
        }
    }

    /// Register an existing directory as a watched folder
    ///
    /// With a remote URL the branch is reconciled and pushed with upstream
    /// tracking; failures there are logged and the folder is added anyway.
    pub async fn add_folder(&self, path: &Path, options: AddFolderOptions) -> Result<WatchedFolder> {
        let path = std::fs::canonicalize(path).map_err(|e| {
            Error::FileSystem(format!("Cannot access {}: {}", path.display(), e))
        })?;
        if !path.is_dir() {
            return Err(Error::FileSystem(format!("{} is not a directory", path.display())));
        }
        if self.registry.contains(&path) {
            return Err(Error::FolderExists(path));
        }

        let display_name = options
            .display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| dir_display_name(&path));
        let meta = FolderMeta::new(display_name, options.remote_url, options.branch);

        let init = options.init;
        let credentials = self.credentials.clone();
        let timeout = self.config.network.git_timeout;
        let (branch, remote_url) = (meta.branch.clone(), meta.remote_url.clone());
        let repo_path = path.clone();

        let (repo, dirty) = self
            .blocking(format!("add {}", path.display()), move || {
                let repo = if GitRepo::is_git_repo(&repo_path) {
                    open_repo(&repo_path, &credentials, timeout)?
                } else if init {
                    info!(folder = %repo_path.display(), "Initializing repository");
                    GitRepo::init(&repo_path)?
                        .with_credentials(credentials)
                        .with_network_timeout(timeout)
                } else {
                    return Err(Error::Config(format!(
                        "Not a git repository: {} (use init to create one)",
                        repo_path.display()
                    )));
                };

                let setup = match remote_url {
                    Some(ref url) => reconcile(&repo, &branch, url).map(|_| ()),
                    None => select_branch(&repo, &branch).map(|_| ()),
                };
                if let Err(e) = setup {
                    warn!(folder = %repo_path.display(), branch = %branch, "Branch setup failed: {}", e);
                }

                let dirty = !repo.is_clean()?;
                Ok((repo, dirty))
            })
            .await?;

        let mut meta = meta;
        meta.last_commit = repo.head_commit_time().ok().flatten();
        let entry = self
            .registry
            .insert(FolderEntry::new(path, meta, Some(repo), dirty))?;
        self.watch_entry(&entry);
        self.persist();

        info!(folder = %entry.path().display(), "Folder added");
        Ok(entry.snapshot())
    }

    /// Clone `url` into `<parent>/<repository name>` and watch the result
    ///
    /// `owner/repo` shorthand is cloned from GitHub.
    pub async fn clone_repository(
        &self,
        url: &str,
        parent: &Path,
        request: CloneRequest,
    ) -> Result<WatchedFolder> {
        let url = expand_shorthand(url);
        let url = url.as_str();
        let name = clone_dir_name(url)
            .ok_or_else(|| Error::Config(format!("Cannot derive a folder name from {}", url)))?;
        let target = parent.join(&name);

        if target.exists() {
            if !request.overwrite {
                return Err(Error::FolderExists(target));
            }
            if self.registry.contains(&folder_key(&target)) {
                return Err(Error::FolderExists(target));
            }
            warn!(target = %target.display(), "Removing existing directory before clone");
            tokio::fs::remove_dir_all(&target).await?;
        }

        let options = CloneOptions {
            branch: request.branch.clone(),
            depth: None,
            timeout: self.config.network.git_timeout,
        };
        clone_repo(url, &target, &options).await?;

        let path = folder_key(&target);
        let repo = open_repo(&path, &self.credentials, self.config.network.git_timeout)?;
        let branch = match request.branch {
            Some(branch) => Some(branch),
            None => repo.current_branch()?,
        };

        let mut meta = FolderMeta::new(name, Some(url.to_string()), branch);
        meta.last_commit = repo.head_commit_time().ok().flatten();
        let entry = self
            .registry
            .insert(FolderEntry::new(path, meta, Some(repo), false))?;
        self.watch_entry(&entry);
        self.persist();

        info!(folder = %entry.path().display(), url, "Cloned and added");
        Ok(entry.snapshot())
    }

    /// Commit the folder's changes, pushing when auto-push is on
    ///
    /// A folder with no observed changes is a no-op. `auto_push`, when
    /// given, is remembered on the folder.
    pub async fn commit(
        &self,
        path: &Path,
        message: Option<String>,
        auto_push: Option<bool>,
    ) -> Result<CommitOutcome> {
        let entry = self.registry.require(&folder_key(path))?;

        if let Some(auto_push) = auto_push {
            entry.update_meta(|m| m.auto_push = auto_push);
        }

        if !entry.is_dirty() {
            debug!(folder = %entry.path().display(), "Nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let meta = entry.meta();
        let message =
            message.unwrap_or_else(|| default_commit_message(&meta.display_name, Local::now()));

        self.commit_entry(&entry, move |repo| {
            sync::commit(
                repo,
                &meta.branch,
                meta.remote_url.as_deref(),
                &message,
                meta.auto_push,
            )
        })
        .await
    }

    /// Run `commit` on the folder's repository and clear its dirty flag
    ///
    /// Changes observed while the commit runs may have missed the index, so
    /// they leave the flag set.
    async fn commit_entry<F>(&self, entry: &FolderEntry, commit: F) -> Result<CommitOutcome>
    where
        F: FnOnce(&GitRepo) -> Result<CommitReport> + Send + 'static,
    {
        let seen = entry.change_generation();
        let report = self.with_repo(entry, "commit", commit).await?;

        if !entry.clear_dirty_since(seen) {
            debug!(folder = %entry.path().display(), "Changed during commit, staying dirty");
        }
        entry.update_meta(|m| m.last_commit = Some(Utc::now()));
        self.persist();

        Ok(CommitOutcome::Committed(report))
    }

    /// Commit every dirty folder concurrently, one task per folder
    pub async fn commit_all(
        self: &Arc<Self>,
        message: Option<String>,
    ) -> Vec<(PathBuf, Result<CommitOutcome>)> {
        let mut tasks = JoinSet::new();

        for entry in self.registry.entries() {
            if !entry.is_dirty() {
                continue;
            }
            let service = Arc::clone(self);
            let message = message.clone();
            let path = entry.path().to_path_buf();
            tasks.spawn(async move {
                let result = service.commit(&path, message, None).await;
                (path, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Commit task failed: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Fetch and merge the folder's upstream
    pub async fn pull(&self, path: &Path) -> Result<PullReport> {
        let entry = self.registry.require(&folder_key(path))?;
        let meta = entry.meta();

        self.with_repo(&entry, "pull", move |repo| {
            sync::pull(repo, &meta.branch, meta.remote_url.as_deref())
        })
        .await
    }

    /// Switch the folder to an existing local or remote branch
    pub async fn switch_branch(&self, path: &Path, branch: &str) -> Result<SwitchOutcome> {
        let entry = self.registry.require(&folder_key(path))?;
        let target = normalize_branch(Some(branch.to_string()));

        let switch_to = target.clone();
        let outcome = self
            .with_repo(&entry, "switch branch", move |repo| {
                sync::switch_branch(repo, &switch_to)
            })
            .await?;

        entry.update_meta(|m| m.branch = target);
        self.persist();
        Ok(outcome)
    }

    /// Fetch and list the folder's local and remote branches
    pub async fn refresh_branches(&self, path: &Path) -> Result<BranchListing> {
        let entry = self.registry.require(&folder_key(path))?;
        self.with_repo(&entry, "refresh branches", |repo| sync::refresh_branches(repo))
            .await
    }

    /// Change a folder's settings
    ///
    /// A new branch is reconciled (or just selected without a remote) and a
    /// new URL is written to `origin`. Repository failures are reported as
    /// warnings; the settings are saved either way.
    pub async fn update_folder(&self, path: &Path, update: FolderUpdate) -> Result<FolderUpdateReport> {
        let entry = self.registry.require(&folder_key(path))?;
        let before = entry.meta();

        if matches!(update.display_name.as_deref(), Some(n) if n.trim().is_empty()) {
            return Err(Error::Config("Folder name must not be empty".to_string()));
        }
        if matches!(update.branch.as_deref(), Some(b) if b.trim().is_empty()) {
            return Err(Error::Config("Branch name must not be empty".to_string()));
        }

        entry.update_meta(|m| {
            if let Some(name) = update.display_name {
                m.display_name = name.trim().to_string();
            }
            if let Some(branch) = update.branch {
                m.branch = normalize_branch(Some(branch));
            }
            if let Some(url) = update.remote_url {
                m.remote_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
            }
            if let Some(auto_push) = update.auto_push {
                m.auto_push = auto_push;
            }
        });
        let after = entry.meta();
        self.persist();

        let branch_changed = after.branch != before.branch;
        let url_changed = after.remote_url.is_some() && after.remote_url != before.remote_url;

        let mut warnings = Vec::new();
        if branch_changed || url_changed {
            let result = self
                .with_repo(&entry, "update folder", move |repo| {
                    let mut warnings = Vec::new();
                    if branch_changed {
                        let setup = match after.remote_url {
                            Some(ref url) => reconcile(repo, &after.branch, url).map(|_| ()),
                            None => select_branch(repo, &after.branch).map(|_| ()),
                        };
                        if let Err(e) = setup {
                            warnings.push(format!("Branch change failed: {}", e));
                        }
                    }
                    if let (true, Some(url)) = (url_changed, after.remote_url.as_deref()) {
                        if let Err(e) = repo.ensure_remote(ORIGIN, url) {
                            warnings.push(format!("Remote update failed: {}", e));
                        }
                    }
                    Ok(warnings)
                })
                .await;

            match result {
                Ok(w) => warnings = w,
                Err(e) => warnings.push(e.to_string()),
            }
        }

        for warning in &warnings {
            warn!(folder = %entry.path().display(), "{}", warning);
        }

        Ok(FolderUpdateReport {
            folder: entry.snapshot(),
            warnings,
        })
    }

    /// Stop watching a folder and forget it
    ///
    /// Waits for any running operation on the folder to finish.
    pub async fn remove_folder(&self, path: &Path) -> Result<WatchedFolder> {
        let key = folder_key(path);
        let entry = self.registry.require(&key)?;

        let _guard = entry.repo_slot().lock_owned().await;
        self.watches.unwatch(entry.path());
        self.registry.remove(entry.path());
        self.lock_removed().insert(entry.path().to_path_buf());
        self.persist();

        info!(folder = %entry.path().display(), "Folder removed");
        Ok(entry.snapshot())
    }

    /// All watched folders, ordered by path
    pub fn list(&self) -> Vec<WatchedFolder> {
        self.registry.snapshot()
    }

    pub fn get(&self, path: &Path) -> Result<WatchedFolder> {
        Ok(self.registry.require(&folder_key(path))?.snapshot())
    }

    /// Check the update source for a different version
    pub async fn check_for_update(&self) -> Result<UpdateCheck> {
        self.updater.check_for_update().await
    }

    /// Install a staged update; a restart is needed afterwards
    pub async fn apply_update(&self, staged: StagedUpdate) -> Result<ApplyReport> {
        self.updater.apply_update(staged).await
    }

    /// Copy a backup taken before installing `version` back into place
    pub async fn restore_backup(&self, version: &str) -> Result<PathBuf> {
        let updater = self.updater.clone();
        let version = version.to_string();
        tokio::task::spawn_blocking(move || updater.restore_backup(&version))
            .await
            .map_err(|e| Error::Other(format!("Restore task failed: {}", e)))?
    }

    /// Start a watcher for every folder; returns how many are being watched
    ///
    /// Folders whose watcher cannot start stay registered and unwatched.
    pub fn start_watching(&self) -> usize {
        self.watching.store(true, Ordering::SeqCst);

        let mut watched = 0;
        for entry in self.registry.entries() {
            match self.watches.watch(entry.path(), entry.dirty_flag()) {
                Ok(()) => watched += 1,
                Err(e) => warn!(folder = %entry.path().display(), "Folder stays unwatched: {}", e),
            }
        }
        watched
    }

    /// Stop all watchers, wait for running operations and persist
    pub async fn shutdown(&self) -> Result<()> {
        self.watching.store(false, Ordering::SeqCst);
        self.watches.stop_all();

        for entry in self.registry.entries() {
            let _guard = entry.repo_slot().lock_owned().await;
        }

        self.save()?;
        info!("Shut down");
        Ok(())
    }
}

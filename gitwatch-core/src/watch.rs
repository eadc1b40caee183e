//! Filesystem watching: turns raw events into per-folder dirty flags
//!
//! Each watched folder gets its own `notify` watcher feeding a dedicated
//! thread. The thread marks the folder's shared dirty flag on every
//! qualifying event and forwards a [`FolderChange`] to the coordinator.
//! Nothing here ever clears a flag.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::{CreateKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::registry::DirtyFlag;
use crate::{Error, Result};

/// A qualifying change inside a watched folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChange {
    /// Root of the watched folder
    pub folder: PathBuf,
    /// Entry that changed
    pub path: PathBuf,
}

enum Signal {
    Event(notify::Result<Event>),
    Stop,
}

/// Whether an event on `path` should mark `folder` dirty
///
/// Creates, modifications and removals of non-directory entries count;
/// anything under the repository's `.git` directory does not.
fn qualifies(folder: &Path, kind: &EventKind, path: &Path) -> bool {
    let relevant = match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => false,
        EventKind::Create(_) | EventKind::Modify(_) => !path.is_dir(),
        EventKind::Remove(_) => true,
        _ => false,
    };
    if !relevant {
        return false;
    }

    let relative = path.strip_prefix(folder).unwrap_or(path);
    !relative.components().any(|c| c.as_os_str() == ".git")
}

/// A running watcher for one folder; stops when dropped
pub struct WatchHandle {
    folder: PathBuf,
    watcher: Option<RecommendedWatcher>,
    signals: mpsc::Sender<Signal>,
    thread: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("folder", &self.folder)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

impl WatchHandle {
    /// Start watching `folder` recursively
    ///
    /// `dirty` is marked on every qualifying event. Notifications go to
    /// `changes` unless they fall inside the `debounce` window of the
    /// previous one.
    pub fn start(
        folder: &Path,
        dirty: Arc<DirtyFlag>,
        changes: Option<UnboundedSender<FolderChange>>,
        debounce: Option<Duration>,
    ) -> Result<Self> {
        let folder = folder.to_path_buf();
        let (tx, rx) = mpsc::channel();

        let event_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(Signal::Event(res));
        })?;
        watcher
            .watch(&folder, RecursiveMode::Recursive)
            .map_err(|e| Error::FileSystem(format!("Cannot watch {}: {}", folder.display(), e)))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let thread_stopped = Arc::clone(&stopped);
        let thread_folder = folder.clone();
        let thread = std::thread::Builder::new()
            .name(format!(
                "watch-{}",
                folder.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            ))
            .spawn(move || {
                notification_loop(thread_folder, rx, dirty, changes, debounce, thread_stopped)
            })?;

        tracing::info!(folder = %folder.display(), "Watching folder");

        Ok(Self {
            folder,
            watcher: Some(watcher),
            signals: tx,
            thread: Some(thread),
            stopped,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Stop watching; no flag is written once this returns
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        drop(self.watcher.take());
        let _ = self.signals.send(Signal::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(folder = %self.folder.display(), "Watch thread panicked");
            }
        }

        tracing::info!(folder = %self.folder.display(), "Stopped watching folder");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn notification_loop(
    folder: PathBuf,
    rx: mpsc::Receiver<Signal>,
    dirty: Arc<DirtyFlag>,
    changes: Option<UnboundedSender<FolderChange>>,
    debounce: Option<Duration>,
    stopped: Arc<AtomicBool>,
) {
    let mut last_sent: Option<Instant> = None;

    while let Ok(signal) = rx.recv() {
        let event = match signal {
            Signal::Stop => break,
            Signal::Event(Ok(event)) => event,
            Signal::Event(Err(e)) => {
                tracing::warn!(folder = %folder.display(), "Watch error: {}", e);
                continue;
            }
        };

        if stopped.load(Ordering::SeqCst) {
            break;
        }

        let Some(path) = event
            .paths
            .iter()
            .find(|p| qualifies(&folder, &event.kind, p))
            .cloned()
        else {
            continue;
        };

        dirty.mark();
        tracing::trace!(folder = %folder.display(), path = %path.display(), "Change detected");

        let Some(ref changes) = changes else {
            continue;
        };
        let now = Instant::now();
        let suppressed = matches!(
            (debounce, last_sent),
            (Some(window), Some(last)) if now.duration_since(last) < window
        );
        if !suppressed {
            last_sent = Some(now);
            let _ = changes.send(FolderChange {
                folder: folder.clone(),
                path,
            });
        }
    }
}

/// Owns the watchers of all folders and the channel their changes arrive on
#[derive(Debug)]
pub struct WatchManager {
    handles: Mutex<HashMap<PathBuf, WatchHandle>>,
    changes: UnboundedSender<FolderChange>,
    debounce: Option<Duration>,
}

impl WatchManager {
    /// Create a manager and the receiving end of its change channel
    pub fn new(debounce: Option<Duration>) -> (Self, UnboundedReceiver<FolderChange>) {
        let (tx, rx) = unbounded_channel();
        let manager = Self {
            handles: Mutex::new(HashMap::new()),
            changes: tx,
            debounce,
        };
        (manager, rx)
    }

    /// Start (or restart) the watcher for `folder`
    pub fn watch(&self, folder: &Path, dirty: Arc<DirtyFlag>) -> Result<()> {
        let handle = WatchHandle::start(folder, dirty, Some(self.changes.clone()), self.debounce)?;
        let previous = self.lock().insert(folder.to_path_buf(), handle);
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    /// Stop the watcher for `folder`, returning whether one was running
    pub fn unwatch(&self, folder: &Path) -> bool {
        let handle = self.lock().remove(folder);
        match handle {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, folder: &Path) -> bool {
        self.lock().contains_key(folder)
    }

    /// Stop every watcher and join its thread
    pub fn stop_all(&self) {
        let handles: Vec<WatchHandle> = self.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, WatchHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, ModifyKind};
    use tempfile::TempDir;

    fn wait_for(flag: &DirtyFlag) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if flag.is_set() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_qualifies() {
        let folder = Path::new("/w");
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));

        assert!(qualifies(folder, &modify, Path::new("/w/file.txt")));
        assert!(qualifies(folder, &EventKind::Remove(RemoveKind::File), Path::new("/w/gone.txt")));
        assert!(!qualifies(folder, &EventKind::Remove(RemoveKind::Folder), Path::new("/w/dir")));
        assert!(!qualifies(folder, &EventKind::Create(CreateKind::Folder), Path::new("/w/dir")));
        assert!(!qualifies(folder, &modify, Path::new("/w/.git/index")));
        assert!(!qualifies(folder, &EventKind::Any, Path::new("/w/file.txt")));
    }

    #[test]
    fn test_write_sets_dirty_and_notifies() {
        let temp = TempDir::new().unwrap();
        let dirty = Arc::new(DirtyFlag::new(false));
        let (manager, mut rx) = WatchManager::new(None);

        manager.watch(temp.path(), Arc::clone(&dirty)).unwrap();
        std::fs::write(temp.path().join("a.txt"), "one").unwrap();
        assert!(wait_for(&dirty));

        // A second write leaves the flag set
        std::fs::write(temp.path().join("a.txt"), "two").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(dirty.is_set());
        assert!(dirty.generation() >= 2);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.folder, temp.path());
        manager.stop_all();
        assert!(!manager.is_watching(temp.path()));
    }

    #[test]
    fn test_git_directory_is_ignored() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let dirty = Arc::new(DirtyFlag::new(false));

        let handle = WatchHandle::start(temp.path(), Arc::clone(&dirty), None, None).unwrap();
        std::fs::write(temp.path().join(".git").join("index"), "x").unwrap();
        std::thread::sleep(Duration::from_millis(500));
        assert!(!dirty.is_set());
        handle.stop();
    }

    #[test]
    fn test_no_writes_after_stop() {
        let temp = TempDir::new().unwrap();
        let dirty = Arc::new(DirtyFlag::new(false));

        let handle = WatchHandle::start(temp.path(), Arc::clone(&dirty), None, None).unwrap();
        handle.stop();

        std::fs::write(temp.path().join("late.txt"), "x").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(!dirty.is_set());
    }

    #[test]
    fn test_debounce_suppresses_notifications_not_flag() {
        let temp = TempDir::new().unwrap();
        let dirty = Arc::new(DirtyFlag::new(false));
        let (manager, mut rx) = WatchManager::new(Some(Duration::from_secs(60)));

        manager.watch(temp.path(), Arc::clone(&dirty)).unwrap();
        std::fs::write(temp.path().join("a.txt"), "one").unwrap();
        assert!(wait_for(&dirty));
        dirty.set(false);

        std::fs::write(temp.path().join("b.txt"), "two").unwrap();
        assert!(wait_for(&dirty));
        manager.unwatch(temp.path());

        let mut notifications = 0;
        while rx.try_recv().is_ok() {
            notifications += 1;
        }
        assert_eq!(notifications, 1);
    }

    #[test]
    fn test_watch_missing_folder_fails() {
        let temp = TempDir::new().unwrap();
        let dirty = Arc::new(DirtyFlag::new(false));
        let result = WatchHandle::start(&temp.path().join("missing"), dirty, None, None);
        assert!(matches!(result, Err(Error::FileSystem(_))));
    }
}

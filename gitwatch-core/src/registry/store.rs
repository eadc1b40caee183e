//! JSON persistence of the folder registry

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

fn default_branch() -> String {
    super::DEFAULT_BRANCH.to_string()
}

fn default_auto_push() -> bool {
    true
}

/// Older state files store `null` for a folder without a remote
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Persisted form of one watched folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub repo_path: String,
    #[serde(default)]
    pub folder_name: String,
    /// Empty when the folder has no remote
    #[serde(default, deserialize_with = "null_as_empty")]
    pub remote_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_auto_push")]
    pub auto_push: bool,
    /// Uncommitted changes were observed
    #[serde(default)]
    pub changes: bool,
}

/// Persisted registry, keyed by absolute folder path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConfig {
    #[serde(default)]
    pub watched_folders: BTreeMap<String, FolderRecord>,
}

/// Exclusive hold on the registry file; released on drop
#[derive(Debug)]
pub struct StateLock {
    _file: std::fs::File,
}

/// Reads and writes the registry file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until no other process is saving the registry
    ///
    /// The lock lives on a `.lock` file next to the registry file, so the
    /// registry file itself can still be replaced by rename.
    pub fn lock(&self) -> Result<StateLock> {
        let lock_path = self.sibling("lock");
        if let Some(dir) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive().map_err(|e| {
            Error::FileSystem(format!("Failed to lock {}: {}", lock_path.display(), e))
        })?;

        Ok(StateLock { _file: file })
    }

    /// Move an unreadable registry file out of the way, keeping it for inspection
    pub fn quarantine(&self) -> Result<PathBuf> {
        let target = self.sibling("corrupt");
        std::fs::rename(&self.path, &target)?;
        Ok(target)
    }

    /// `<file name>.<suffix>` in the registry file's directory
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Load the registry; a missing file is an empty registry
    pub fn load(&self) -> Result<PersistedConfig> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file yet");
                return Ok(PersistedConfig::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Write the registry atomically (temp file in the same directory, then rename)
    pub fn save(&self, config: &PersistedConfig) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, config)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), folders = config.watched_folders.len(), "Saved state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> PersistedConfig {
        let mut config = PersistedConfig::default();
        config.watched_folders.insert(
            "/srv/bot".into(),
            FolderRecord {
                repo_path: "/srv/bot".into(),
                folder_name: "Bot".into(),
                remote_url: "https://github.com/acme/bot.git".into(),
                branch: "dev".into(),
                auto_push: false,
                changes: true,
            },
        );
        config.watched_folders.insert(
            "/srv/site".into(),
            FolderRecord {
                repo_path: "/srv/site".into(),
                folder_name: "site".into(),
                remote_url: String::new(),
                branch: "main".into(),
                auto_push: true,
                changes: false,
            },
        );
        config
    }

    #[test]
    fn test_save_then_load_is_equal() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("nested").join("watcher_config.json"));

        let config = sample();
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("absent.json"));
        assert!(store.load().unwrap().watched_folders.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = StateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"watched_folders": {"/srv/x": {"repo_path": "/srv/x", "folder_name": "x"}}}"#;
        let config: PersistedConfig = serde_json::from_str(json).unwrap();
        let record = &config.watched_folders["/srv/x"];
        assert_eq!(record.branch, "main");
        assert!(record.auto_push);
        assert!(!record.changes);
        assert!(record.remote_url.is_empty());
    }

    #[test]
    fn test_null_remote_url_loads() {
        let json = r#"{"watched_folders": {"/srv/x": {"repo_path": "/srv/x", "folder_name": "x", "remote_url": null, "branch": "main", "auto_push": true, "changes": true}}}"#;
        let config: PersistedConfig = serde_json::from_str(json).unwrap();
        let record = &config.watched_folders["/srv/x"];
        assert!(record.remote_url.is_empty());
        assert!(record.changes);
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = StateStore::new(&path);

        let moved = store.quarantine().unwrap();
        assert_eq!(moved, temp.path().join("state.json.corrupt"));
        assert!(moved.exists());
        assert!(store.load().unwrap().watched_folders.is_empty());
    }

    #[test]
    fn test_lock_is_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("nested").join("state.json"));

        let lock = store.lock().unwrap();
        assert!(temp.path().join("nested").join("state.json.lock").exists());
        drop(lock);
        let _again = store.lock().unwrap();
    }

    #[test]
    fn test_file_layout() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("state.json"));
        store.save(&sample()).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let bot = &value["watched_folders"]["/srv/bot"];
        for key in ["repo_path", "folder_name", "remote_url", "branch", "auto_push", "changes"] {
            assert!(bot.get(key).is_some(), "missing {}", key);
        }
        assert!(raw.contains("\n  \"watched_folders\""));
    }
}

//! Self-update: fetch the published version, back up, replace
//!
//! The update source is a repository whose root holds a plain-text version
//! file. Checking clones it shallowly into a temporary directory; applying
//! backs the installation up to `backup_v<version>` and copies the clone
//! over the installation root. The running process is never restarted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::{UpdateConfig, STATE_FILE_NAME};
use crate::git::{clone_repo, CloneOptions};
use crate::{Error, Result};

/// Version of this build
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether `latest` differs from `current`
///
/// Any difference counts, including an older published version.
pub fn is_update_available(current: &str, latest: &str) -> bool {
    current != latest
}

/// A cloned update waiting to be applied; removed from disk when dropped
#[derive(Debug)]
pub struct StagedUpdate {
    _dir: TempDir,
    source: PathBuf,
    version: String,
}

impl StagedUpdate {
    /// Version published by the update source
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Root of the cloned installation
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Outcome of [`Updater::check_for_update`]
#[derive(Debug)]
pub enum UpdateCheck {
    UpToDate { version: String },
    Available(StagedUpdate),
}

impl UpdateCheck {
    pub fn is_available(&self) -> bool {
        matches!(self, UpdateCheck::Available(_))
    }

    /// Version published by the update source
    pub fn latest_version(&self) -> &str {
        match self {
            UpdateCheck::UpToDate { version } => version,
            UpdateCheck::Available(staged) => staged.version(),
        }
    }
}

/// Result of a completed apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub version: String,
    pub backup_dir: PathBuf,
    /// The new files take effect on the next start
    pub restart_required: bool,
}

/// Checks for and installs new versions
#[derive(Debug, Clone)]
pub struct Updater {
    config: UpdateConfig,
    current_version: String,
    timeout: Duration,
}

impl Updater {
    pub fn new(config: UpdateConfig, timeout: Duration) -> Self {
        Self {
            config,
            current_version: CURRENT_VERSION.to_string(),
            timeout,
        }
    }

    /// Compare against a version other than the compiled-in one
    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Shallow-clone the update source and compare its version marker
    ///
    /// The clone is deleted before returning unless an update is available,
    /// in which case it travels inside the returned [`StagedUpdate`].
    pub async fn check_for_update(&self) -> Result<UpdateCheck> {
        let url = self
            .config
            .repo_url
            .as_deref()
            .ok_or_else(|| Error::Config("No update repository configured ([update] repo_url)".to_string()))?;

        let dir = tempfile::Builder::new().prefix("gitwatch-update-").tempdir()?;
        let source = dir.path().join("source");

        let options = CloneOptions {
            branch: Some(self.config.branch.clone()),
            depth: Some(1),
            timeout: self.timeout,
        };
        clone_repo(url, &source, &options).await?;

        let marker = source.join(&self.config.version_file);
        let latest = tokio::fs::read_to_string(&marker)
            .await
            .map_err(|e| {
                Error::FileSystem(format!(
                    "Update source has no readable {}: {}",
                    self.config.version_file, e
                ))
            })?
            .trim()
            .to_string();
        check_version(&latest)?;

        if !is_update_available(&self.current_version, &latest) {
            info!(version = %latest, "Already up to date");
            return Ok(UpdateCheck::UpToDate { version: latest });
        }

        info!(current = %self.current_version, latest = %latest, "Update available");
        Ok(UpdateCheck::Available(StagedUpdate {
            _dir: dir,
            source,
            version: latest,
        }))
    }

    /// Back up the installation and copy the staged update over it
    ///
    /// The staged clone is removed once this returns, whatever the outcome.
    pub async fn apply_update(&self, staged: StagedUpdate) -> Result<ApplyReport> {
        let install_dir = self.config.resolve_install_dir()?;

        tokio::task::spawn_blocking(move || {
            let result = apply_update_from(&install_dir, staged.source(), staged.version());
            drop(staged);
            result
        })
        .await
        .map_err(|e| Error::Other(format!("Update task failed: {}", e)))?
    }

    /// Copy `backup_v<version>` back over the installation
    pub fn restore_backup(&self, version: &str) -> Result<PathBuf> {
        restore_backup(&self.config.resolve_install_dir()?, version)
    }
}

/// Reject version strings that cannot name a backup directory
///
/// The version ends up as part of a path inside the installation, so it
/// must be a single non-empty line with no separators or parent references.
pub fn check_version(version: &str) -> Result<()> {
    let invalid = version.is_empty()
        || version.lines().count() > 1
        || version.contains(['/', '\\'])
        || version.contains("..");
    if invalid {
        return Err(Error::FileSystem(format!(
            "Invalid version marker {:?}",
            version
        )));
    }
    Ok(())
}

/// Directory name of the backup taken before installing `version`
pub fn backup_dir_name(version: &str) -> String {
    format!("backup_v{}", version)
}

fn backup_dir(install_dir: &Path, version: &str) -> Result<PathBuf> {
    check_version(version)?;
    Ok(install_dir.join(backup_dir_name(version)))
}

/// Entries never included in a backup: scratch and earlier backups, and VCS metadata
fn excluded_from_backup(name: &str) -> bool {
    name.starts_with("temp_") || name.starts_with("backup_") || name == ".git"
}

/// Entries of the update source never copied into the installation
fn excluded_from_install(name: &str) -> bool {
    name == ".git" || name == STATE_FILE_NAME || excluded_from_backup(name)
}

/// Back up `install_dir`, then copy every entry of `source` into it
pub fn apply_update_from(install_dir: &Path, source: &Path, version: &str) -> Result<ApplyReport> {
    let backup_dir = backup_dir(install_dir, version)?;
    if backup_dir.exists() {
        std::fs::remove_dir_all(&backup_dir)
            .map_err(|e| fs_error("remove old backup", &backup_dir, e))?;
    }

    copy_tree(install_dir, &backup_dir, &excluded_from_backup)?;
    info!(backup = %backup_dir.display(), "Backed up installation");

    if let Err(e) = install_entries(source, install_dir) {
        warn!(backup = %backup_dir.display(), "Update failed, backup kept: {}", e);
        return Err(e);
    }

    info!(version, "Update installed; restart to use it");
    Ok(ApplyReport {
        version: version.to_string(),
        backup_dir,
        restart_required: true,
    })
}

/// Copy a backup back into `install_dir`, leaving the state file alone
pub fn restore_backup(install_dir: &Path, version: &str) -> Result<PathBuf> {
    let backup_dir = backup_dir(install_dir, version)?;
    if !backup_dir.is_dir() {
        return Err(Error::NotFound(format!(
            "No backup at {}",
            backup_dir.display()
        )));
    }

    install_entries(&backup_dir, install_dir)?;
    info!(backup = %backup_dir.display(), "Restored installation from backup");
    Ok(backup_dir)
}

fn install_entries(source: &Path, install_dir: &Path) -> Result<()> {
    let mut entries = read_dir_sorted(source)?;
    entries.retain(|(name, _)| !excluded_from_install(name));

    for (name, src) in entries {
        let dst = install_dir.join(&name);
        let metadata = std::fs::metadata(&src).map_err(|e| fs_error("read", &src, e))?;

        if metadata.is_dir() {
            if dst.exists() {
                std::fs::remove_dir_all(&dst).map_err(|e| fs_error("remove", &dst, e))?;
            }
            copy_tree(&src, &dst, &|_| false)?;
        } else {
            std::fs::copy(&src, &dst).map_err(|e| fs_error("copy", &src, e))?;
        }
    }

    Ok(())
}

/// Recursively copy `src` into `dst`, following symlinks and skipping
/// entries whose name matches `skip` at any depth
fn copy_tree(src: &Path, dst: &Path, skip: &dyn Fn(&str) -> bool) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| fs_error("create", dst, e))?;

    for (name, from) in read_dir_sorted(src)? {
        if skip(&name) {
            continue;
        }
        let to = dst.join(&name);
        let metadata = std::fs::metadata(&from).map_err(|e| fs_error("read", &from, e))?;

        if metadata.is_dir() {
            copy_tree(&from, &to, skip)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| fs_error("copy", &from, e))?;
        }
    }

    Ok(())
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| fs_error("list", dir, e))? {
        let entry = entry.map_err(|e| fs_error("list", dir, e))?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    entries.sort();
    Ok(entries)
}

fn fs_error(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::FileSystem(format!("Failed to {} {}: {}", action, path.display(), err))
}

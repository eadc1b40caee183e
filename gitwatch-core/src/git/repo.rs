//! Git repository handle and local operations

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use git2::{IndexAddOption, Repository, Signature, StatusOptions};

use crate::credentials::Credentials;
use crate::{Error, Result};

/// Name of the remote every watched folder synchronizes with
pub const ORIGIN: &str = "origin";

/// Fallback identity when neither the repository nor the user config has one
const FALLBACK_NAME: &str = "gitwatch";
const FALLBACK_EMAIL: &str = "gitwatch@localhost";

/// A git repository wrapper providing the operations gitwatch needs
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the working tree root
    root: PathBuf,
    /// Credentials offered to remote transports
    pub(crate) credentials: Credentials,
    /// Budget for a single network transfer
    pub(crate) network_timeout: Duration,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open the repository whose working tree is exactly `path`
    ///
    /// Parent directories are not searched: a watched folder must be a
    /// repository root of its own.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::open(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::Config(format!("Not a git repository: {}", path.display()))
            } else {
                Error::from(e)
            }
        })?;

        Self::from_repository(repo)
    }

    /// Initialize a new repository at `path` and record everything already
    /// present in an initial commit
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::init(path.as_ref())?;
        let repo = Self::from_repository(repo)?;

        if let Err(e) = repo.commit_all("Initial commit") {
            tracing::warn!(path = %repo.root.display(), "Initial commit failed: {}", e);
        }

        Ok(repo)
    }

    fn from_repository(repo: Repository) -> Result<Self> {
        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self {
            repo,
            root,
            credentials: Credentials::default(),
            network_timeout: Duration::from_secs(120),
        })
    }

    /// Use these credentials for fetch and push
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Abort transfers that run longer than `timeout`
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Get the repository root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if the given path is itself a git repository
    pub fn is_git_repo(path: impl AsRef<Path>) -> bool {
        Repository::open(path.as_ref()).is_ok()
    }

    /// Get the current branch name, `None` when HEAD is detached or unborn
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            Ok(None)
        }
    }

    /// Whether HEAD points at a branch with no commits yet
    pub fn is_unborn(&self) -> Result<bool> {
        match self.repo.head() {
            Ok(_) => Ok(false),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(true),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Id of the commit HEAD resolves to
    pub fn head_commit(&self) -> Result<Option<String>> {
        if self.is_unborn()? {
            return Ok(None);
        }
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(Some(commit.id().to_string()))
    }

    /// Commit time of HEAD
    pub fn head_commit_time(&self) -> Result<Option<DateTime<Utc>>> {
        if self.is_unborn()? {
            return Ok(None);
        }
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(Utc.timestamp_opt(commit.time().seconds(), 0).single())
    }

    /// Whether the working tree matches HEAD (untracked files count as changes)
    pub fn is_clean(&self) -> Result<bool> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses.is_empty())
    }

    /// Stage every change in the working tree (additions, modifications,
    /// deletions; `.gitignore` honoured) and commit it on HEAD
    ///
    /// Returns the new commit id.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        let parent = if self.is_unborn()? {
            None
        } else {
            Some(self.repo.head()?.peel_to_commit()?)
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        tracing::debug!(path = %self.root.display(), commit = %oid, "Created commit");
        Ok(oid.to_string())
    }

    /// Author/committer identity from git config, or a fixed fallback
    pub(crate) fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
        }
    }

    /// URL of a remote, if the remote exists and has one
    pub fn remote_url(&self, name: &str) -> Option<String> {
        self.repo
            .find_remote(name)
            .ok()
            .and_then(|r| r.url().map(|u| u.to_string()))
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use git2::{Repository, RepositoryInitOptions, Signature};

    /// Initialize a working repository on `main` with one committed file
    pub fn init_repo_with_commit(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).unwrap();
        std::fs::write(path.join("README.md"), "hello\n").unwrap();
        commit_everything(&repo, "initial");
        repo
    }

    /// Initialize a bare repository usable as a local remote
    pub fn init_bare(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head("main");
        Repository::init_opts(path, &opts).unwrap()
    }

    /// Stage all files and commit on HEAD
    pub fn commit_everything(repo: &Repository, message: &str) -> git2::Oid {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }
}

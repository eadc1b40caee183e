//! Sync engine: commit, push, pull and branch switching for one folder
//!
//! Every function here runs synchronously against a [`Backend`]; the
//! service calls them on a blocking task while holding the folder's lock.

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::git::{Backend, ORIGIN};
use crate::reconcile::reconcile;
use crate::{Error, Result};

/// Message used when the caller does not supply one
pub fn default_commit_message(display_name: &str, now: DateTime<Local>) -> String {
    format!("Auto-commit: {} - {}", display_name, now.format("%Y-%m-%d %H:%M"))
}

/// What happened to the push that follows a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Auto-push off or no remote configured
    Skipped,
    /// Pushed to the existing upstream
    Pushed,
    /// Upstream was missing; it was established and the push retried
    PushedAfterUpstream,
    /// Push failed; the commit itself stands
    Failed(String),
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub branch: String,
    pub commit_id: String,
    pub push: PushOutcome,
}

/// Result of a commit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The folder had no recorded changes
    NothingToCommit,
    Committed(CommitReport),
}

/// Result of a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Whether HEAD moved
    pub changed: bool,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Result of a branch switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    AlreadyOnBranch,
    CheckedOutLocal,
    TrackedRemote,
}

/// Local and remote branch names of a folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchListing {
    pub local: Vec<String>,
    pub remote: Vec<String>,
}

/// Make `branch` the active branch without inventing history
///
/// Tries the local branch, then a branch tracking `origin`. On a repository
/// with no commits the branch is just named.
fn ensure_on_branch<B: Backend>(backend: &B, branch: &str) -> Result<()> {
    if backend.current_branch()?.as_deref() == Some(branch) {
        return Ok(());
    }

    if backend.local_branches()?.iter().any(|b| b == branch) {
        return backend.checkout_local(branch);
    }

    if backend.has_remote(ORIGIN) && backend.remote_branches(ORIGIN)?.iter().any(|b| b == branch) {
        return backend.checkout_tracking(branch, ORIGIN);
    }

    if backend.is_unborn()? {
        return backend.checkout_new(branch);
    }

    Err(Error::BranchNotFound(branch.to_string()))
}

/// Stage and commit all changes on `branch`, then push if asked to
///
/// The caller has already checked the folder is dirty. A missing upstream
/// triggers one reconciliation followed by one retry; any other push failure
/// is reported in the outcome and the commit still counts.
pub fn commit<B: Backend>(
    backend: &B,
    branch: &str,
    remote_url: Option<&str>,
    message: &str,
    auto_push: bool,
) -> Result<CommitReport> {
    ensure_on_branch(backend, branch)?;

    let commit_id = backend.commit_all(message)?;
    info!(branch, commit = %commit_id, "Committed changes");

    let push = match remote_url {
        Some(url) if auto_push => push_after_commit(backend, branch, url),
        _ => PushOutcome::Skipped,
    };

    Ok(CommitReport {
        branch: branch.to_string(),
        commit_id,
        push,
    })
}

fn push_after_commit<B: Backend>(backend: &B, branch: &str, url: &str) -> PushOutcome {
    match backend.push(ORIGIN, branch, false) {
        Ok(()) => PushOutcome::Pushed,
        Err(e) if e.is_retryable() => {
            info!(branch, "No upstream yet, reconciling before retrying push");
            if let Err(e) = reconcile(backend, branch, url) {
                warn!(branch, "Reconciliation failed: {}", e);
                return PushOutcome::Failed(e.to_string());
            }
            match backend.push(ORIGIN, branch, false) {
                Ok(()) => PushOutcome::PushedAfterUpstream,
                Err(e) => {
                    warn!(branch, "Push failed after establishing upstream: {}", e);
                    PushOutcome::Failed(e.to_string())
                }
            }
        }
        Err(e) => {
            warn!(branch, "Push failed: {}", e);
            PushOutcome::Failed(e.to_string())
        }
    }
}

/// Fetch and integrate the upstream of `branch`
pub fn pull<B: Backend>(backend: &B, branch: &str, remote_url: Option<&str>) -> Result<PullReport> {
    let url = remote_url
        .ok_or_else(|| Error::Config("Folder has no remote URL to pull from".to_string()))?;

    ensure_on_branch(backend, branch)?;
    let before = backend.head_commit()?;

    if !backend.has_upstream(branch)? {
        reconcile(backend, branch, url)?;
        if !backend.has_upstream(branch)? {
            // Empty repository and nothing on the remote yet
            return Ok(PullReport {
                changed: false,
                before: before.clone(),
                after: before,
            });
        }
    }

    backend.fetch(ORIGIN)?;
    backend.merge_upstream(branch)?;

    let after = backend.head_commit()?;
    let changed = before != after;
    info!(branch, changed, "Pulled");

    Ok(PullReport {
        changed,
        before,
        after,
    })
}

/// Switch to an existing local or remote branch; never creates one
pub fn switch_branch<B: Backend>(backend: &B, branch: &str) -> Result<SwitchOutcome> {
    if backend.current_branch()?.as_deref() == Some(branch) {
        return Ok(SwitchOutcome::AlreadyOnBranch);
    }

    if backend.has_remote(ORIGIN) {
        if let Err(e) = backend.fetch(ORIGIN) {
            warn!(branch, "Fetch before switch failed: {}", e);
        }
    }

    if backend.local_branches()?.iter().any(|b| b == branch) {
        backend.checkout_local(branch)?;
        return Ok(SwitchOutcome::CheckedOutLocal);
    }

    if backend.has_remote(ORIGIN) && backend.remote_branches(ORIGIN)?.iter().any(|b| b == branch) {
        backend.checkout_tracking(branch, ORIGIN)?;
        return Ok(SwitchOutcome::TrackedRemote);
    }

    Err(Error::BranchNotFound(branch.to_string()))
}

/// Fetch `origin` and list local and remote branches
pub fn refresh_branches<B: Backend>(backend: &B) -> Result<BranchListing> {
    let remote = if backend.has_remote(ORIGIN) {
        backend.fetch(ORIGIN)?;
        backend.remote_branches(ORIGIN)?
    } else {
        Vec::new()
    };

    Ok(BranchListing {
        local: backend.local_branches()?,
        remote,
    })
}

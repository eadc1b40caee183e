//! Branch reconciliation between a working copy and its remote
//!
//! Puts a folder's working copy on its configured branch (local first, then
//! a branch tracking `origin`, then a fresh branch from HEAD) and, when a
//! remote URL is known, points `origin` at it and pushes with upstream
//! tracking.

use tracing::{debug, info, warn};

use crate::git::{Backend, ORIGIN};
use crate::Result;

/// How the working copy gets onto the desired branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchAction {
    /// The branch exists locally
    CheckoutLocal,
    /// The branch exists only on `origin`; create a tracking branch
    TrackRemote,
    /// The branch exists nowhere; create it from HEAD
    CreateFromHead,
}

impl BranchAction {
    /// Pick the action for `desired` given the known local and remote branches
    ///
    /// Local branches win over remote ones, so local work is never discarded.
    pub fn decide(desired: &str, local: &[String], remote: &[String]) -> Self {
        if local.iter().any(|b| b == desired) {
            BranchAction::CheckoutLocal
        } else if remote.iter().any(|b| b == desired) {
            BranchAction::TrackRemote
        } else {
            BranchAction::CreateFromHead
        }
    }
}

/// Result of a full reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// What was done to get onto the branch
    pub action: BranchAction,
    /// Whether the branch was pushed with upstream tracking
    pub upstream_established: bool,
}

/// Put the working copy on `desired`, fetching `origin` first if it exists
///
/// A failed fetch is logged and the decision is made on the remote-tracking
/// branches already known.
pub fn select_branch<B: Backend>(backend: &B, desired: &str) -> Result<BranchAction> {
    if backend.has_remote(ORIGIN) {
        if let Err(e) = backend.fetch(ORIGIN) {
            warn!(branch = desired, "Fetch before branch selection failed: {}", e);
        }
    }

    let local = backend.local_branches()?;
    let remote = if backend.has_remote(ORIGIN) {
        backend.remote_branches(ORIGIN)?
    } else {
        Vec::new()
    };

    let action = BranchAction::decide(desired, &local, &remote);
    debug!(branch = desired, ?action, "Selecting branch");

    let already_on = backend.current_branch()?.as_deref() == Some(desired);
    match action {
        BranchAction::CheckoutLocal if already_on => {}
        BranchAction::CheckoutLocal => backend.checkout_local(desired)?,
        BranchAction::TrackRemote => backend.checkout_tracking(desired, ORIGIN)?,
        BranchAction::CreateFromHead => backend.checkout_new(desired)?,
    }

    Ok(action)
}

/// Select `desired`, point `origin` at `remote_url` and push with upstream
///
/// A non-fast-forward rejection surfaces as
/// [`Error::UpstreamConflict`](crate::Error::UpstreamConflict) and is not
/// retried.
pub fn reconcile<B: Backend>(backend: &B, desired: &str, remote_url: &str) -> Result<ReconcileOutcome> {
    let action = select_branch(backend, desired)?;

    backend.ensure_remote(ORIGIN, remote_url)?;

    if backend.is_unborn()? {
        // Nothing to push until the first commit exists
        info!(branch = desired, "Branch has no commits yet; upstream not established");
        return Ok(ReconcileOutcome {
            action,
            upstream_established: false,
        });
    }

    backend.push(ORIGIN, desired, true)?;
    info!(branch = desired, remote = remote_url, "Upstream established");

    Ok(ReconcileOutcome {
        action,
        upstream_established: true,
    })
}

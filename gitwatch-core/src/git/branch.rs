//! Branch listing, checkout and upstream tracking

use git2::build::CheckoutBuilder;
use git2::BranchType;

use super::repo::GitRepo;
use crate::{Error, Result};

impl GitRepo {
    /// List all local branches, sorted
    pub fn list_local_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();

        for branch in self.inner().branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name().ok().flatten() {
                branches.push(name.to_string());
            }
        }

        branches.sort();
        Ok(branches)
    }

    /// List the branches a remote advertises, as short names, sorted
    ///
    /// Reads the remote-tracking refs left by the last fetch; the symbolic
    /// `<remote>/HEAD` is skipped.
    pub fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", remote);
        let mut branches = Vec::new();

        for branch in self.inner().branches(Some(BranchType::Remote))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name().ok().flatten() {
                if let Some(short) = name.strip_prefix(&prefix) {
                    if short != "HEAD" {
                        branches.push(short.to_string());
                    }
                }
            }
        }

        branches.sort();
        Ok(branches)
    }

    /// Switch the working tree and HEAD to an existing local branch
    pub fn checkout_local(&self, branch: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);
        let target = self
            .inner()
            .revparse_single(&refname)
            .map_err(|_| Error::BranchNotFound(branch.to_string()))?;

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.inner().checkout_tree(&target, Some(&mut checkout))?;
        self.inner().set_head(&refname)?;

        tracing::debug!(path = %self.root().display(), branch, "Checked out local branch");
        Ok(())
    }

    /// Create a local branch from `<remote>/<branch>`, track it, check it out
    pub fn checkout_tracking(&self, branch: &str, remote: &str) -> Result<()> {
        let remote_name = format!("{}/{}", remote, branch);
        let remote_branch = self
            .inner()
            .find_branch(&remote_name, BranchType::Remote)
            .map_err(|_| Error::BranchNotFound(branch.to_string()))?;
        let commit = remote_branch.get().peel_to_commit()?;

        let mut local = self.inner().branch(branch, &commit, false)?;
        local.set_upstream(Some(remote_name.as_str()))?;

        self.checkout_local(branch)
    }

    /// Create a branch at HEAD and point HEAD at it, keeping the working tree
    ///
    /// On an unborn HEAD the branch is only named; it comes into existence
    /// with the first commit.
    pub fn checkout_new(&self, branch: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);

        if !self.is_unborn()? {
            let head = self.inner().head()?.peel_to_commit()?;
            self.inner().branch(branch, &head, false)?;
        }
        self.inner().set_head(&refname)?;

        tracing::debug!(path = %self.root().display(), branch, "Created branch from HEAD");
        Ok(())
    }

    /// Whether `branch` has an upstream configured
    pub fn has_upstream(&self, branch: &str) -> Result<bool> {
        let config = self.inner().config()?;
        let has_remote = config.get_string(&format!("branch.{}.remote", branch)).is_ok();
        let has_merge = config.get_string(&format!("branch.{}.merge", branch)).is_ok();
        Ok(has_remote && has_merge)
    }

    /// Record `<remote>/<branch>` as the upstream of `branch`
    pub(crate) fn set_upstream_config(&self, branch: &str, remote: &str) -> Result<()> {
        let mut config = self.inner().config()?;
        config.set_str(&format!("branch.{}.remote", branch), remote)?;
        config.set_str(
            &format!("branch.{}.merge", branch),
            &format!("refs/heads/{}", branch),
        )?;
        Ok(())
    }

    /// Remote-tracking ref that `branch` merges from, e.g. `refs/remotes/origin/main`
    pub(crate) fn upstream_ref(&self, branch: &str) -> Result<String> {
        let config = self.inner().config()?;
        let remote = config
            .get_string(&format!("branch.{}.remote", branch))
            .map_err(|_| Error::MissingUpstream(branch.to_string()))?;
        let merge = config
            .get_string(&format!("branch.{}.merge", branch))
            .map_err(|_| Error::MissingUpstream(branch.to_string()))?;
        let short = merge.strip_prefix("refs/heads/").unwrap_or(&merge);
        Ok(format!("refs/remotes/{}/{}", remote, short))
    }
}

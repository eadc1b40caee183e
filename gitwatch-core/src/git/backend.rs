//! Backend abstraction for version-control operations
//!
//! The reconciler and the sync engine only talk to this trait, so their
//! decision logic can be exercised without a real repository.

use super::repo::GitRepo;
use crate::Result;

/// Version-control operations the sync engine relies on
pub trait Backend {
    /// Active branch, `None` when HEAD is detached or unborn
    fn current_branch(&self) -> Result<Option<String>>;

    /// Whether HEAD names a branch with no commits yet
    fn is_unborn(&self) -> Result<bool>;

    /// Commit id HEAD resolves to
    fn head_commit(&self) -> Result<Option<String>>;

    /// Whether remote `name` is configured
    fn has_remote(&self, name: &str) -> bool;

    /// Update remote-tracking branches of `remote`
    fn fetch(&self, remote: &str) -> Result<()>;

    /// Local branch names, sorted
    fn local_branches(&self) -> Result<Vec<String>>;

    /// Branch names of `remote` as of the last fetch, sorted
    fn remote_branches(&self, remote: &str) -> Result<Vec<String>>;

    /// Check out an existing local branch
    fn checkout_local(&self, branch: &str) -> Result<()>;

    /// Create a local branch tracking `<remote>/<branch>` and check it out
    fn checkout_tracking(&self, branch: &str, remote: &str) -> Result<()>;

    /// Create a branch at HEAD and check it out
    fn checkout_new(&self, branch: &str) -> Result<()>;

    /// Create remote `name` or point it at `url`
    fn ensure_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Whether `branch` has upstream tracking configured
    fn has_upstream(&self, branch: &str) -> Result<bool>;

    /// Push `branch`, optionally registering the upstream
    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<()>;

    /// Stage everything and commit on HEAD, returning the commit id
    fn commit_all(&self, message: &str) -> Result<String>;

    /// Integrate the fetched upstream of `branch`
    fn merge_upstream(&self, branch: &str) -> Result<()>;
}

impl Backend for GitRepo {
    fn current_branch(&self) -> Result<Option<String>> {
        GitRepo::current_branch(self)
    }

    fn is_unborn(&self) -> Result<bool> {
        GitRepo::is_unborn(self)
    }

    fn head_commit(&self) -> Result<Option<String>> {
        GitRepo::head_commit(self)
    }

    fn has_remote(&self, name: &str) -> bool {
        GitRepo::has_remote(self, name)
    }

    fn fetch(&self, remote: &str) -> Result<()> {
        GitRepo::fetch(self, remote)
    }

    fn local_branches(&self) -> Result<Vec<String>> {
        self.list_local_branches()
    }

    fn remote_branches(&self, remote: &str) -> Result<Vec<String>> {
        self.list_remote_branches(remote)
    }

    fn checkout_local(&self, branch: &str) -> Result<()> {
        GitRepo::checkout_local(self, branch)
    }

    fn checkout_tracking(&self, branch: &str, remote: &str) -> Result<()> {
        GitRepo::checkout_tracking(self, branch, remote)
    }

    fn checkout_new(&self, branch: &str) -> Result<()> {
        GitRepo::checkout_new(self, branch)
    }

    fn ensure_remote(&self, name: &str, url: &str) -> Result<()> {
        GitRepo::ensure_remote(self, name, url)
    }

    fn has_upstream(&self, branch: &str) -> Result<bool> {
        GitRepo::has_upstream(self, branch)
    }

    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<()> {
        GitRepo::push(self, remote, branch, set_upstream)
    }

    fn commit_all(&self, message: &str) -> Result<String> {
        GitRepo::commit_all(self, message)
    }

    fn merge_upstream(&self, branch: &str) -> Result<()> {
        GitRepo::merge_upstream(self, branch)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory backend with failure injection

    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    use super::Backend;
    use crate::{Error, Result};

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub current: Option<String>,
        pub local: BTreeMap<String, u32>,
        pub origin: Option<String>,
        /// Branches as they exist on the server
        pub server: BTreeMap<String, u32>,
        /// Remote-tracking branches as of the last fetch
        pub fetched: BTreeMap<String, u32>,
        pub upstream: BTreeSet<String>,
        pub next_commit: u32,
        pub fail_fetch: bool,
        pub reject_push: bool,
        pub push_network_error: bool,
        pub calls: Vec<String>,
    }

    #[derive(Debug, Default)]
    pub struct FakeBackend {
        pub state: RefCell<FakeState>,
    }

    impl FakeBackend {
        /// Repository on `main` with one commit
        pub fn with_commit() -> Self {
            let fake = Self::default();
            {
                let mut s = fake.state.borrow_mut();
                s.current = Some("main".to_string());
                s.next_commit = 2;
                s.local.insert("main".to_string(), 1);
            }
            fake
        }

        /// Repository with an `origin` remote advertising these branches
        pub fn with_origin(self, url: &str, server: &[&str]) -> Self {
            {
                let mut s = self.state.borrow_mut();
                s.origin = Some(url.to_string());
                for branch in server {
                    s.server.insert(branch.to_string(), 100);
                }
            }
            self
        }

        pub fn add_local(&self, branch: &str) {
            self.state.borrow_mut().local.insert(branch.to_string(), 1);
        }

        pub fn calls(&self) -> Vec<String> {
            self.state.borrow().calls.clone()
        }

        fn record(&self, call: String) {
            self.state.borrow_mut().calls.push(call);
        }
    }

    impl Backend for FakeBackend {
        fn current_branch(&self) -> Result<Option<String>> {
            let s = self.state.borrow();
            Ok(s.current.clone().filter(|b| s.local.contains_key(b)))
        }

        fn is_unborn(&self) -> Result<bool> {
            let s = self.state.borrow();
            Ok(s.current.as_ref().map_or(true, |b| !s.local.contains_key(b)))
        }

        fn head_commit(&self) -> Result<Option<String>> {
            let s = self.state.borrow();
            Ok(s.current
                .as_ref()
                .and_then(|b| s.local.get(b))
                .map(|id| id.to_string()))
        }

        fn has_remote(&self, _name: &str) -> bool {
            self.state.borrow().origin.is_some()
        }

        fn fetch(&self, remote: &str) -> Result<()> {
            self.record(format!("fetch {}", remote));
            let mut s = self.state.borrow_mut();
            if s.origin.is_none() {
                return Err(Error::Config(format!("Remote '{}' not found", remote)));
            }
            if s.fail_fetch {
                return Err(Error::Network("unreachable".to_string()));
            }
            s.fetched = s.server.clone();
            Ok(())
        }

        fn local_branches(&self) -> Result<Vec<String>> {
            Ok(self.state.borrow().local.keys().cloned().collect())
        }

        fn remote_branches(&self, _remote: &str) -> Result<Vec<String>> {
            Ok(self.state.borrow().fetched.keys().cloned().collect())
        }

        fn checkout_local(&self, branch: &str) -> Result<()> {
            self.record(format!("checkout_local {}", branch));
            let mut s = self.state.borrow_mut();
            if !s.local.contains_key(branch) {
                return Err(Error::BranchNotFound(branch.to_string()));
            }
            s.current = Some(branch.to_string());
            Ok(())
        }

        fn checkout_tracking(&self, branch: &str, remote: &str) -> Result<()> {
            self.record(format!("checkout_tracking {} {}", branch, remote));
            let mut s = self.state.borrow_mut();
            let id = *s
                .fetched
                .get(branch)
                .ok_or_else(|| Error::BranchNotFound(branch.to_string()))?;
            s.local.insert(branch.to_string(), id);
            s.upstream.insert(branch.to_string());
            s.current = Some(branch.to_string());
            Ok(())
        }

        fn checkout_new(&self, branch: &str) -> Result<()> {
            self.record(format!("checkout_new {}", branch));
            let mut s = self.state.borrow_mut();
            let head = s.current.as_ref().and_then(|b| s.local.get(b)).copied();
            if let Some(id) = head {
                s.local.insert(branch.to_string(), id);
            }
            s.current = Some(branch.to_string());
            Ok(())
        }

        fn ensure_remote(&self, name: &str, url: &str) -> Result<()> {
            self.record(format!("ensure_remote {} {}", name, url));
            self.state.borrow_mut().origin = Some(url.to_string());
            Ok(())
        }

        fn has_upstream(&self, branch: &str) -> Result<bool> {
            Ok(self.state.borrow().upstream.contains(branch))
        }

        fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<()> {
            self.record(format!("push {} {} {}", remote, branch, set_upstream));
            let mut s = self.state.borrow_mut();
            if !set_upstream && !s.upstream.contains(branch) {
                return Err(Error::MissingUpstream(branch.to_string()));
            }
            if s.origin.is_none() {
                return Err(Error::Config(format!("Remote '{}' not found", remote)));
            }
            if s.reject_push {
                return Err(Error::UpstreamConflict {
                    branch: branch.to_string(),
                    message: "non-fast-forward".to_string(),
                });
            }
            if s.push_network_error {
                return Err(Error::Network("connection reset".to_string()));
            }
            let id = *s
                .local
                .get(branch)
                .ok_or_else(|| Error::BranchNotFound(branch.to_string()))?;
            s.server.insert(branch.to_string(), id);
            s.fetched.insert(branch.to_string(), id);
            if set_upstream {
                s.upstream.insert(branch.to_string());
            }
            Ok(())
        }

        fn commit_all(&self, message: &str) -> Result<String> {
            self.record(format!("commit {}", message));
            let mut s = self.state.borrow_mut();
            let branch = s
                .current
                .clone()
                .ok_or_else(|| Error::Git("HEAD is detached".to_string()))?;
            let id = s.next_commit.max(1);
            s.next_commit = id + 1;
            s.local.insert(branch, id);
            Ok(id.to_string())
        }

        fn merge_upstream(&self, branch: &str) -> Result<()> {
            self.record(format!("merge {}", branch));
            let mut s = self.state.borrow_mut();
            if !s.upstream.contains(branch) {
                return Err(Error::MissingUpstream(branch.to_string()));
            }
            if let Some(id) = s.fetched.get(branch).copied() {
                s.local.insert(branch.to_string(), id);
            }
            Ok(())
        }
    }
}

//! Git operations for gitwatch
//!
//! This module wraps `git2` for repository work (status, commit, branches,
//! fetch, push, merge) and shells out to `git` for clones.

mod backend;
mod branch;
mod clone;
mod remote;
mod repo;

pub use backend::Backend;
pub use clone::{clone_dir_name, clone_repo, expand_shorthand, CloneOptions, RepoUrl};
pub use repo::{GitRepo, ORIGIN};

#[cfg(test)]
pub(crate) use backend::fake::FakeBackend;
#[cfg(test)]
pub(crate) use repo::test_support;

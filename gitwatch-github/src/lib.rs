//! gitwatch GitHub - repository listing for gitwatch
//!
//! This crate reads repository metadata and branch lists from the GitHub
//! REST API so a repository can be inspected before it is cloned.

mod client;
mod error;

pub use client::{parse_github_url, Branch, GitHubClient, Repository, DEFAULT_API_URL};
pub use error::{Error, Result};

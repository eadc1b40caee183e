//! Error types for gitwatch

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for gitwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gitwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport failure talking to a remote (clone, fetch, push, pull, API)
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid or insufficient credential
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Remote platform rate limit hit
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Repository absent, or private without a credential
    #[error("Not found: {0}")]
    NotFound(String),

    /// Push rejected because the remote history is not a fast-forward
    #[error("Push of '{branch}' rejected (non-fast-forward): {message}")]
    UpstreamConflict { branch: String, message: String },

    /// Branch has no upstream tracking configured; establishing it may help
    #[error("Branch '{0}' has no upstream branch")]
    MissingUpstream(String),

    /// Branch exists neither locally nor on the remote
    #[error("Branch '{0}' not found locally or on origin")]
    BranchNotFound(String),

    /// Merging the upstream produced conflicts; nothing was changed
    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    /// Operation exceeded its time budget
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// No watched folder at this path
    #[error("Folder is not watched: {}", .0.display())]
    FolderNotFound(PathBuf),

    /// Folder is already watched, or a clone target already exists
    #[error("Folder already exists: {}", .0.display())]
    FolderExists(PathBuf),

    /// Watch setup or copy failure
    #[error("Filesystem error: {0}")]
    FileSystem(String),

    /// Unreadable or invalid configuration/state
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other version-control backend failure
    #[error("Git error: {0}")]
    Git(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the sync engine may recover from this error by establishing
    /// upstream tracking and retrying once
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::MissingUpstream(_))
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};

        let message = err.message().to_string();
        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) => Error::Auth(message),
            (ErrorCode::NotFastForward, _) => Error::UpstreamConflict {
                branch: String::new(),
                message,
            },
            (ErrorCode::Certificate, _) => Error::Network(message),
            (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh) => {
                Error::Network(message)
            }
            _ => Error::Git(message),
        }
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::FileSystem(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{ErrorClass, ErrorCode};

    #[test]
    fn test_only_missing_upstream_is_retryable() {
        assert!(Error::MissingUpstream("main".into()).is_retryable());
        assert!(!Error::Auth("bad token".into()).is_retryable());
        assert!(!Error::UpstreamConflict {
            branch: "main".into(),
            message: "rejected".into()
        }
        .is_retryable());
        assert!(!Error::Network("timeout".into()).is_retryable());
    }

    #[test]
    fn test_git2_auth_maps_to_auth() {
        let err = git2::Error::new(ErrorCode::Auth, ErrorClass::Net, "bad credentials");
        assert!(matches!(Error::from(err), Error::Auth(_)));
    }

    #[test]
    fn test_git2_non_fast_forward_maps_to_conflict() {
        let err = git2::Error::new(
            ErrorCode::NotFastForward,
            ErrorClass::Reference,
            "cannot push non-fastforwardable reference",
        );
        assert!(matches!(Error::from(err), Error::UpstreamConflict { .. }));
    }

    #[test]
    fn test_git2_transport_maps_to_network() {
        let err = git2::Error::new(ErrorCode::GenericError, ErrorClass::Http, "unexpected http status");
        assert!(matches!(Error::from(err), Error::Network(_)));
    }

    #[test]
    fn test_git2_other_maps_to_git() {
        let err = git2::Error::new(ErrorCode::NotFound, ErrorClass::Reference, "no such ref");
        assert!(matches!(Error::from(err), Error::Git(_)));
    }
}

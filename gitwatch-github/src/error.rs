//! Error types for GitHub operations

use thiserror::Error;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during GitHub operations
#[derive(Error, Debug)]
pub enum Error {
    /// Token missing, invalid or expired (HTTP 401)
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Rate limit exceeded or access forbidden (HTTP 403)
    #[error("GitHub rate limit exceeded: {0}")]
    RateLimited(String),

    /// Repository absent, or private and no token given (HTTP 404)
    #[error("Repository {0} not found or not accessible")]
    NotFound(String),

    /// Any other unsuccessful status
    #[error("GitHub API returned {status}: {message}")]
    Access { status: u16, message: String },

    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Map an unsuccessful response status to an error
    pub(crate) fn from_status(status: u16, repo: &str, message: String) -> Self {
        match status {
            401 => Error::Auth(message),
            403 => Error::RateLimited(message),
            404 => Error::NotFound(repo.to_string()),
            _ => Error::Access { status, message },
        }
    }
}

impl From<Error> for gitwatch_core::Error {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Auth(_) => gitwatch_core::Error::Auth(message),
            Error::RateLimited(_) => gitwatch_core::Error::RateLimited(message),
            Error::NotFound(_) => gitwatch_core::Error::NotFound(message),
            Error::Network(_) => gitwatch_core::Error::Network(message),
            Error::Access { .. } | Error::Parse(_) => gitwatch_core::Error::Other(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(Error::from_status(401, "a/b", "x".into()), Error::Auth(_)));
        assert!(matches!(Error::from_status(403, "a/b", "x".into()), Error::RateLimited(_)));
        assert!(matches!(Error::from_status(404, "a/b", "x".into()), Error::NotFound(ref r) if r == "a/b"));
        assert!(matches!(
            Error::from_status(500, "a/b", "x".into()),
            Error::Access { status: 500, .. }
        ));
    }

    #[test]
    fn test_into_core_error() {
        let core: gitwatch_core::Error = Error::NotFound("a/b".into()).into();
        assert!(matches!(core, gitwatch_core::Error::NotFound(_)));
    }
}

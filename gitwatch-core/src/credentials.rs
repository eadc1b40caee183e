//! Access token for private repositories
//!
//! The token is kept out of `config.toml` so the config can be shared.
//! It is read from `GITHUB_TOKEN`, falling back to
//! `~/.config/gitwatch/credentials.toml`, which must be owner-only (0600)
//! on Unix.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Environment variable consulted before the credentials file
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialsFile {
    github: GitHubSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GitHubSection {
    token: Option<String>,
}

/// Resolved credentials used for git transports and the listing API
#[derive(Clone, Default)]
pub struct Credentials {
    token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Credentials carrying an explicit token
    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into().trim().to_string();
        Self {
            token: (!token.is_empty()).then_some(token),
        }
    }

    /// Resolve credentials: `GITHUB_TOKEN` first, then the credentials file.
    /// A missing file yields empty credentials.
    pub fn load() -> Result<Self> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                debug!("Using token from {}", TOKEN_ENV);
                return Ok(Self::with_token(token));
            }
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Read a credentials file, refusing group/world-readable files on Unix
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = std::fs::metadata(path)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Credentials file {} has insecure permissions {:o}. Run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }

        let contents = std::fs::read_to_string(path)?;
        let file: CredentialsFile = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse credentials: {}", e)))?;

        debug!(path = %path.display(), "Loaded credentials file");
        Ok(file.github.token.map(Self::with_token).unwrap_or_default())
    }

    /// `~/.config/gitwatch/credentials.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitwatch").join("credentials.toml"))
    }

    /// The token, if any
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

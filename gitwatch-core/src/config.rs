//! Configuration management for gitwatch
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (GITWATCH_*)
//! 3. Config file (~/.config/gitwatch/config.toml)
//! 4. Default values

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File name of the persisted folder registry
pub const STATE_FILE_NAME: &str = "watcher_config.json";

/// Where the folder registry is persisted
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path to the registry JSON file
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: dirs::config_dir()
                .map(|p| p.join("gitwatch"))
                .unwrap_or_else(|| PathBuf::from("."))
                .join(STATE_FILE_NAME),
        }
    }
}

/// Time budgets for remote operations
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Upper bound for one backend operation (clone, fetch, push, pull, commit)
    #[serde(with = "humantime_serde")]
    pub git_timeout: Duration,

    /// Upper bound for one listing API request
    #[serde(with = "humantime_serde")]
    pub api_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            git_timeout: Duration::from_secs(120),
            api_timeout: Duration::from_secs(10),
        }
    }
}

/// Filesystem watching settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Minimum interval between change notifications for one folder.
    /// The dirty flag is set on every event regardless.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub debounce: Option<Duration>,
}

/// Self-update source
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Repository holding the released installation
    pub repo_url: Option<String>,

    /// Branch to clone
    pub branch: String,

    /// Plain-text file at the repository root holding the version string
    pub version_file: String,

    /// Installation root to back up and overwrite (defaults to the executable's directory)
    pub install_dir: Option<PathBuf>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            repo_url: None,
            branch: "main".to_string(),
            version_file: "version.txt".to_string(),
            install_dir: None,
        }
    }
}

impl UpdateConfig {
    /// Resolve the installation root
    pub fn resolve_install_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.install_dir {
            return Ok(dir.clone());
        }

        let exe = std::env::current_exe()?;
        exe.parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| Error::Config("Could not determine installation directory".to_string()))
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Registry persistence
    pub state: StateConfig,

    /// Network time budgets
    pub network: NetworkConfig,

    /// Watcher settings
    pub watch: WatchConfig,

    /// Self-update source
    pub update: UpdateConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/gitwatch/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitwatch").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - GITWATCH_STATE: Path to the registry file
    /// - GITWATCH_UPDATE_REPO: Self-update repository URL
    /// - GITWATCH_GIT_TIMEOUT_SECS: Backend operation timeout in seconds
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("GITWATCH_STATE") {
            self.state.path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("GITWATCH_UPDATE_REPO") {
            self.update.repo_url = Some(url);
        }

        if let Ok(secs) = std::env::var("GITWATCH_GIT_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) => self.network.git_timeout = Duration::from_secs(secs),
                Err(e) => tracing::warn!(value = %secs, "Ignoring GITWATCH_GIT_TIMEOUT_SECS: {}", e),
            }
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, state_path: Option<PathBuf>) -> Self {
        if let Some(path) = state_path {
            self.state.path = path;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(state_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()
            .with_cli_overrides(state_path))
    }
}

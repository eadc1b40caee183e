//! Repository cloning and URL parsing

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::{Error, Result};

/// Parsed repository information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    /// Repository owner/organization
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Full clone URL
    pub clone_url: String,
    /// Host (e.g., "github.com")
    pub host: String,
}

impl RepoUrl {
    /// Parse a repository URL or shorthand
    ///
    /// Supports:
    /// - `https://github.com/owner/repo`
    /// - `https://github.com/owner/repo.git`
    /// - `git@github.com:owner/repo.git`
    /// - `owner/repo` (assumes GitHub)
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if !input.contains("://") && !input.contains('@') && input.contains('/') {
            let parts: Vec<&str> = input.split('/').collect();
            if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
                let owner = parts[0].to_string();
                let repo = parts[1].trim_end_matches(".git").to_string();
                return Ok(Self {
                    clone_url: format!("https://github.com/{}/{}.git", owner, repo),
                    owner,
                    repo,
                    host: "github.com".to_string(),
                });
            }
        }

        if let Some(rest) = input.strip_prefix("git@") {
            if let Some((host, path)) = rest.split_once(':') {
                let parts: Vec<&str> = path.trim_end_matches(".git").split('/').collect();
                if parts.len() >= 2 {
                    return Ok(Self {
                        owner: parts[0].to_string(),
                        repo: parts[1].to_string(),
                        clone_url: input.to_string(),
                        host: host.to_string(),
                    });
                }
            }
        }

        if input.starts_with("https://") || input.starts_with("http://") {
            if let Ok(url) = url::Url::parse(input) {
                let host = url.host_str().unwrap_or("").to_string();
                let path = url.path().trim_start_matches('/').trim_end_matches(".git");
                let parts: Vec<&str> = path.split('/').collect();

                if parts.len() >= 2 && !parts[1].is_empty() {
                    let clone_url = if input.ends_with(".git") {
                        input.to_string()
                    } else {
                        format!("{}.git", input)
                    };

                    return Ok(Self {
                        owner: parts[0].to_string(),
                        repo: parts[1].to_string(),
                        clone_url,
                        host,
                    });
                }
            }
        }

        Err(Error::Config(format!(
            "Invalid repository URL: {}. Expected format: owner/repo, https://github.com/owner/repo, or git@github.com:owner/repo.git",
            input
        )))
    }
}

/// Expand `owner/repo` shorthand to its GitHub clone URL
///
/// Full URLs and paths that exist locally are returned unchanged.
pub fn expand_shorthand(input: &str) -> String {
    let input = input.trim();
    let shorthand = !input.contains("://")
        && !input.contains('@')
        && !input.starts_with('.')
        && !Path::new(input).exists();
    match RepoUrl::parse(input) {
        Ok(parsed) if shorthand => parsed.clone_url,
        _ => input.to_string(),
    }
}

/// Directory name a clone of `url` gets: its last path segment without `.git`
///
/// Works for any git URL, including local paths and `file://` URLs.
pub fn clone_dir_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.trim_end_matches(".git");
    (!name.is_empty()).then(|| name.to_string())
}

/// Options for one `git clone` invocation
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Branch to check out
    pub branch: Option<String>,
    /// Truncate history to this many commits
    pub depth: Option<u32>,
    /// Kill the clone if it runs longer than this
    pub timeout: Duration,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            branch: None,
            depth: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Clone `url` into `target` with the `git` executable
///
/// The target must not exist yet. A clone that outlives its timeout is
/// killed and reported as [`Error::Timeout`].
pub async fn clone_repo(url: &str, target: &Path, options: &CloneOptions) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::FileSystem(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if let Some(ref branch) = options.branch {
        cmd.arg("--branch").arg(branch);
    }
    if let Some(depth) = options.depth {
        cmd.arg("--depth").arg(depth.to_string()).arg("--single-branch");
    }
    cmd.arg(url)
        .arg(target)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(url, target = %target.display(), branch = ?options.branch, depth = ?options.depth, "Cloning");

    let output = match tokio::time::timeout(options.timeout, cmd.output()).await {
        Ok(output) => output.map_err(|e| Error::Other(format!("Failed to run git clone: {}", e)))?,
        Err(_) => {
            // The child was killed on drop; remove whatever it wrote
            let _ = tokio::fs::remove_dir_all(target).await;
            return Err(Error::Timeout {
                operation: format!("clone of {}", url),
                after: options.timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_clone_failure(url, &stderr));
    }

    Ok(())
}

/// Map `git clone` stderr onto the error taxonomy
fn classify_clone_failure(url: &str, stderr: &str) -> Error {
    if stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("could not read Username")
    {
        return Error::Auth(format!(
            "Authentication failed for {}. Check your credentials or repository access.",
            url
        ));
    }

    if stderr.contains("Remote branch") && stderr.contains("not found") {
        return Error::BranchNotFound(stderr.trim().to_string());
    }

    if stderr.contains("not found") || stderr.contains("does not exist") {
        return Error::NotFound(format!("Repository not found: {}", url));
    }

    if stderr.contains("Could not resolve host") || stderr.contains("unable to access") {
        return Error::Network(format!(
            "Network error cloning {}. Check your internet connection.",
            url
        ));
    }

    Error::Git(format!("git clone failed: {}", stderr.trim()))
}

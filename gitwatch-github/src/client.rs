//! GitHub REST client for repository info and branch listing

use std::time::Duration;

use chrono::{DateTime, Utc};
use gitwatch_core::{Credentials, RepoUrl};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, Result};

/// Public GitHub API endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Branches requested per page
const PER_PAGE: usize = 100;

/// Repository metadata
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    pub clone_url: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

/// A branch as listed by the API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

/// GitHub API client for one repository
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    owner: String,
    repo: String,
}

impl GitHubClient {
    /// Create a client for `owner/repo`
    ///
    /// The token is optional: public repositories can be listed without one.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gitwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let owner = owner.into();
        let repo = repo.into();
        info!(owner = %owner, repo = %repo, authenticated = credentials.token().is_some(), "Created GitHub client");

        Ok(Self {
            http,
            base_url: DEFAULT_API_URL.to_string(),
            token: credentials.token().map(|t| t.to_string()),
            owner,
            repo,
        })
    }

    /// Create a client from a repository URL or `owner/repo` shorthand
    pub fn from_url(url: &str, credentials: &Credentials, timeout: Duration) -> Result<Self> {
        let (owner, repo) = parse_github_url(url)?;
        Self::new(owner, repo, credentials, timeout)
    }

    /// Point the client at another API endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the repository owner
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Get the repository name
    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// `GET /repos/{owner}/{repo}`
    pub async fn get_repository(&self) -> Result<Repository> {
        let path = format!("/repos/{}/{}", self.owner, self.repo);
        self.get_json(&path, &[]).await
    }

    /// `GET /repos/{owner}/{repo}/branches`, following every page
    pub async fn list_branches(&self) -> Result<Vec<Branch>> {
        let path = format!("/repos/{}/{}/branches", self.owner, self.repo);
        let mut branches = Vec::new();
        let mut page = 1usize;

        loop {
            let batch: Vec<Branch> = self
                .get_json(
                    &path,
                    &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
                )
                .await?;
            let last = batch.len() < PER_PAGE;
            branches.extend(batch);
            if last {
                break;
            }
            page += 1;
        }

        debug!(repo = %self.full_name(), count = branches.len(), "Listed branches");
        Ok(branches)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(query);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response".to_string());
            let message = serde_json::from_str::<ApiMessage>(&text)
                .map(|m| m.message)
                .unwrap_or(text);
            return Err(Error::from_status(status.as_u16(), &self.full_name(), message));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Parse(format!("Unexpected response from {}: {}", path, e)))
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

/// Parse a GitHub URL into owner and repo
///
/// Supports formats:
/// - owner/repo
/// - https://github.com/owner/repo
/// - git@github.com:owner/repo.git
pub fn parse_github_url(url: &str) -> Result<(String, String)> {
    let parsed = RepoUrl::parse(url).map_err(|e| Error::Parse(e.to_string()))?;
    if parsed.host != "github.com" {
        return Err(Error::Parse(format!("Not a GitHub repository: {}", url)));
    }
    Ok((parsed.owner, parsed.repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_shorthand() {
        let (owner, repo) = parse_github_url("owner/repo").unwrap();
        assert_eq!(owner, "owner");
        assert_eq!(repo, "repo");
    }

    #[test]
    fn test_parse_https_url() {
        let (owner, repo) = parse_github_url("https://github.com/owner/repo").unwrap();
        assert_eq!(owner, "owner");
        assert_eq!(repo, "repo");
    }

    #[test]
    fn test_parse_https_url_with_git_suffix() {
        let (owner, repo) = parse_github_url("https://github.com/owner/repo.git").unwrap();
        assert_eq!(owner, "owner");
        assert_eq!(repo, "repo");
    }

    #[test]
    fn test_parse_ssh_url() {
        let (owner, repo) = parse_github_url("git@github.com:owner/repo.git").unwrap();
        assert_eq!(owner, "owner");
        assert_eq!(repo, "repo");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_github_url("invalid").is_err());
        assert!(parse_github_url("https://github.com/owner").is_err());
        assert!(matches!(
            parse_github_url("https://gitlab.com/owner/repo"),
            Err(Error::Parse(_))
        ));
    }

    /// Serve canned responses: `route` maps a request line to (status, body)
    async fn serve(route: fn(&str) -> (u16, String)) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    loop {
                        let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]);
                    let request_line = request.lines().next().unwrap_or_default().to_string();
                    let (status, body) = route(&request_line);
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    fn client(base: &str) -> GitHubClient {
        GitHubClient::new("acme", "bot", &Credentials::with_token("t0k"), Duration::from_secs(5))
            .unwrap()
            .with_base_url(base)
    }

    fn branches_route(request_line: &str) -> (u16, String) {
        if request_line.contains("/repos/acme/bot/branches") {
            let (start, count) = if request_line.contains("&page=1 ") {
                (0, PER_PAGE)
            } else {
                (PER_PAGE, 3)
            };
            let items: Vec<String> = (start..start + count)
                .map(|i| format!("{{\"name\":\"b{:03}\",\"protected\":false}}", i))
                .collect();
            return (200, format!("[{}]", items.join(",")));
        }
        if request_line.contains("/repos/acme/bot") {
            return (
                200,
                r#"{"full_name":"acme/bot","description":null,"default_branch":"main","private":false,"clone_url":"https://github.com/acme/bot.git","html_url":"https://github.com/acme/bot","pushed_at":"2024-03-09T07:05:00Z","stargazers_count":3}"#
                    .to_string(),
            );
        }
        (404, r#"{"message":"Not Found"}"#.to_string())
    }

    #[tokio::test]
    async fn test_get_repository() {
        let base = serve(branches_route).await;
        let repo = client(&base).get_repository().await.unwrap();
        assert_eq!(repo.full_name, "acme/bot");
        assert_eq!(repo.default_branch, "main");
        assert!(repo.pushed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_branches_follows_pages() {
        let base = serve(branches_route).await;
        let branches = client(&base).list_branches().await.unwrap();
        assert_eq!(branches.len(), PER_PAGE + 3);
        assert_eq!(branches[0].name, "b000");
        assert_eq!(branches.last().unwrap().name, "b102");
    }

    #[tokio::test]
    async fn test_status_codes_map_to_errors() {
        fn route(request_line: &str) -> (u16, String) {
            if request_line.contains("/repos/a/") {
                (401, r#"{"message":"Bad credentials"}"#.to_string())
            } else if request_line.contains("/repos/b/") {
                (403, r#"{"message":"API rate limit exceeded"}"#.to_string())
            } else if request_line.contains("/repos/c/") {
                (404, r#"{"message":"Not Found"}"#.to_string())
            } else {
                (502, "bad gateway".to_string())
            }
        }
        let base = serve(route).await;
        let get = |owner: &str| {
            GitHubClient::new(owner, "r", &Credentials::default(), Duration::from_secs(5))
                .unwrap()
                .with_base_url(base.clone())
        };

        let err = get("a").get_repository().await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "Bad credentials"));
        assert!(matches!(get("b").get_repository().await, Err(Error::RateLimited(_))));
        assert!(matches!(get("c").get_repository().await, Err(Error::NotFound(_))));
        assert!(matches!(
            get("d").get_repository().await,
            Err(Error::Access { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr)).get_repository().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}

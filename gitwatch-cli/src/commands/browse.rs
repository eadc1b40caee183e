//! Browse command - inspect a GitHub repository before cloning it

use clap::Args;
use gitwatch_core::{Config, Credentials};
use gitwatch_github::GitHubClient;

/// Show a GitHub repository and its branches
#[derive(Args, Debug)]
pub struct BrowseArgs {
    /// Repository (owner/repo or URL)
    pub repo: String,
}

impl BrowseArgs {
    pub async fn execute(&self, config: &Config, credentials: &Credentials) -> anyhow::Result<()> {
        let client = GitHubClient::from_url(&self.repo, credentials, config.network.api_timeout)?;

        let repo = client.get_repository().await?;
        let branches = client.list_branches().await?;

        println!("{}", repo.full_name);
        if let Some(ref description) = repo.description {
            println!("  {}", description);
        }
        println!();
        println!("  Clone URL:      {}", repo.clone_url);
        println!("  Default branch: {}", repo.default_branch);
        println!("  Visibility:     {}", if repo.private { "private" } else { "public" });
        if let Some(pushed_at) = repo.pushed_at {
            println!("  Last push:      {}", pushed_at.format("%Y-%m-%d %H:%M UTC"));
        }
        println!();
        println!("Branches ({}):", branches.len());
        for branch in &branches {
            let marker = if branch.name == repo.default_branch { "*" } else { " " };
            let protected = if branch.protected { " (protected)" } else { "" };
            println!("  {} {}{}", marker, branch.name, protected);
        }
        Ok(())
    }
}

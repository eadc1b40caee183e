//! Commit, pull and branch commands

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use gitwatch_core::{CommitOutcome, CommitReport, PushOutcome, SwitchOutcome, SyncService};

/// Commit (and push) a folder's changes
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Watched folder
    #[arg(default_value = ".", conflicts_with = "all")]
    pub path: PathBuf,

    /// Commit every folder with changes
    #[arg(short, long)]
    pub all: bool,

    /// Commit message (defaults to "Auto-commit: <name> - <time>")
    #[arg(short, long)]
    pub message: Option<String>,

    /// Push after committing, and remember the choice
    #[arg(long, conflicts_with = "no_push")]
    pub push: bool,

    /// Do not push, and remember the choice
    #[arg(long)]
    pub no_push: bool,
}

impl CommitArgs {
    pub async fn execute(&self, service: Arc<SyncService>) -> anyhow::Result<()> {
        if self.all {
            let results = service.commit_all(self.message.clone()).await;
            if results.is_empty() {
                println!("No folders with changes.");
            }
            let mut failed = 0;
            for (path, result) in results {
                print!("{}: ", path.display());
                match result {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => {
                        failed += 1;
                        println!("failed: {}", e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} folder(s) failed to commit", failed);
            }
            return Ok(());
        }

        let auto_push = match (self.push, self.no_push) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let outcome = service
            .commit(&self.path, self.message.clone(), auto_push)
            .await?;
        print_outcome(&outcome);
        Ok(())
    }
}

fn print_outcome(outcome: &CommitOutcome) {
    match outcome {
        CommitOutcome::NothingToCommit => println!("nothing to commit"),
        CommitOutcome::Committed(report) => print_report(report),
    }
}

fn print_report(report: &CommitReport) {
    let short = &report.commit_id[..report.commit_id.len().min(8)];
    let push = match &report.push {
        PushOutcome::Skipped => "not pushed".to_string(),
        PushOutcome::Pushed => "pushed".to_string(),
        PushOutcome::PushedAfterUpstream => "pushed (upstream created)".to_string(),
        PushOutcome::Failed(reason) => format!("push failed: {}", reason),
    };
    println!("committed {} on {}, {}", short, report.branch, push);
}

/// Pull a folder's upstream
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Watched folder
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

impl PullArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let report = service.pull(&self.path).await?;
        if report.changed {
            println!(
                "Updated {} -> {}",
                short_id(report.before.as_deref()),
                short_id(report.after.as_deref())
            );
        } else {
            println!("Already up to date.");
        }
        Ok(())
    }
}

fn short_id(id: Option<&str>) -> &str {
    match id {
        Some(id) => &id[..id.len().min(8)],
        None => "(none)",
    }
}

/// Switch a folder to another branch
#[derive(Args, Debug)]
pub struct SwitchArgs {
    /// Branch to switch to
    pub branch: String,

    /// Watched folder
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

impl SwitchArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let outcome = service.switch_branch(&self.path, &self.branch).await?;
        match outcome {
            SwitchOutcome::AlreadyOnBranch => println!("Already on {}", self.branch),
            SwitchOutcome::CheckedOutLocal => println!("Switched to {}", self.branch),
            SwitchOutcome::TrackedRemote => {
                println!("Switched to {} (tracking origin/{})", self.branch, self.branch)
            }
        }
        Ok(())
    }
}

/// List a folder's local and remote branches
#[derive(Args, Debug)]
pub struct BranchesArgs {
    /// Watched folder
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

impl BranchesArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let current = service.get(&self.path)?.branch;
        let listing = service.refresh_branches(&self.path).await?;

        println!("Local:");
        for branch in &listing.local {
            let marker = if *branch == current { "*" } else { " " };
            println!("  {} {}", marker, branch);
        }
        println!("Remote:");
        if listing.remote.is_empty() {
            println!("    (none)");
        }
        for branch in &listing.remote {
            println!("    {}", branch);
        }
        Ok(())
    }
}

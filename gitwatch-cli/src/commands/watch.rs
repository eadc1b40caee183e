//! Watch command - run the watchers until interrupted

use anyhow::Context;
use clap::Args;
use gitwatch_core::{SyncService, UpdateCheck, CURRENT_VERSION};
use tracing::{debug, info, warn};

/// Watch every registered folder until Ctrl-C
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Pull every folder with a remote before watching
    #[arg(long)]
    pub pull: bool,

    /// Check the update source for a new version before watching
    #[arg(long)]
    pub check_update: bool,
}

/// Line to show when a check found a new version
fn update_notice(check: &UpdateCheck) -> Option<String> {
    match check {
        UpdateCheck::UpToDate { .. } => None,
        UpdateCheck::Available(staged) => Some(format!(
            "Update available: {} -> {}. Run `gitwatch update apply` to install it.",
            CURRENT_VERSION,
            staged.version()
        )),
    }
}

impl WatchArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        if self.check_update {
            match service.check_for_update().await {
                Ok(check) => match update_notice(&check) {
                    Some(notice) => {
                        info!(latest = %check.latest_version(), "Update available");
                        println!("{}", notice);
                    }
                    None => debug!(version = %check.latest_version(), "No update available"),
                },
                Err(e) => warn!("Update check failed: {}", e),
            }
        }

        if self.pull {
            for folder in service.list() {
                if folder.remote_url.is_none() {
                    continue;
                }
                match service.pull(&folder.path).await {
                    Ok(report) if report.changed => {
                        info!(folder = %folder.path.display(), "Pulled remote changes")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(folder = %folder.path.display(), "Pull failed: {}", e),
                }
            }
        }

        let mut changes = service
            .take_changes()
            .context("Change stream already in use")?;
        let watched = service.start_watching();
        println!(
            "Watching {} of {} folder(s). Press Ctrl-C to stop.",
            watched,
            service.list().len()
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    if let Err(e) = result {
                        warn!("Cannot listen for Ctrl-C: {}", e);
                    }
                    break;
                }
                change = changes.recv() => {
                    let Some(change) = change else { break };
                    info!(
                        folder = %change.folder.display(),
                        path = %change.path.display(),
                        "Change detected"
                    );
                    if let Err(e) = service.save() {
                        warn!("Failed to save state: {}", e);
                    }
                }
            }
        }

        println!("Stopping...");
        service.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        watch: WatchArgs,
    }

    #[test]
    fn test_check_update_flag() {
        let cli = Cli::try_parse_from(["watch", "--check-update"]).unwrap();
        assert!(cli.watch.check_update);
        assert!(!cli.watch.pull);

        let cli = Cli::try_parse_from(["watch"]).unwrap();
        assert!(!cli.watch.check_update);
    }

    #[test]
    fn test_no_notice_when_up_to_date() {
        let check = UpdateCheck::UpToDate {
            version: CURRENT_VERSION.to_string(),
        };
        assert!(update_notice(&check).is_none());
    }
}

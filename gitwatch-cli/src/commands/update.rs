//! Self-update commands

use clap::{Args, Subcommand};
use gitwatch_core::{SyncService, UpdateCheck, CURRENT_VERSION};

/// Check for, apply or roll back self-updates
#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(subcommand)]
    pub command: UpdateCommand,
}

#[derive(Subcommand, Debug)]
pub enum UpdateCommand {
    /// Compare the installed version with the update source
    Check,

    /// Download and install the latest version
    Apply,

    /// Restore the backup taken before installing a version
    Restore {
        /// Version whose pre-install backup to restore
        version: String,
    },
}

impl UpdateArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        match &self.command {
            UpdateCommand::Check => {
                match service.check_for_update().await? {
                    UpdateCheck::UpToDate { version } => {
                        println!("Up to date ({})", version);
                    }
                    UpdateCheck::Available(staged) => {
                        println!("Update available: {} -> {}", CURRENT_VERSION, staged.version());
                        println!("Run `gitwatch update apply` to install it.");
                    }
                }
                Ok(())
            }
            UpdateCommand::Apply => {
                let staged = match service.check_for_update().await? {
                    UpdateCheck::UpToDate { version } => {
                        println!("Already up to date ({})", version);
                        return Ok(());
                    }
                    UpdateCheck::Available(staged) => staged,
                };

                println!("Installing {}...", staged.version());
                let report = service.apply_update(staged).await?;
                println!("Installed {}", report.version);
                println!("  Backup: {}", report.backup_dir.display());
                if report.restart_required {
                    println!("Restart gitwatch to use the new version.");
                }
                Ok(())
            }
            UpdateCommand::Restore { version } => {
                let dir = service.restore_backup(version).await?;
                println!("Restored installation from {}", dir.display());
                println!("Restart gitwatch to use the restored version.");
                Ok(())
            }
        }
    }
}

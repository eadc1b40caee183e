//! Folder registration commands

use std::path::PathBuf;

use chrono::Local;
use clap::Args;
use gitwatch_core::{AddFolderOptions, CloneRequest, FolderUpdate, SyncService, WatchedFolder};

/// Start watching a folder
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Folder to watch
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Display name (defaults to the directory name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Remote repository URL
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Branch to work on
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Initialize a repository if the folder is not one
    #[arg(long)]
    pub init: bool,
}

impl AddArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let options = AddFolderOptions {
            display_name: self.name.clone(),
            remote_url: self.remote.clone(),
            branch: self.branch.clone(),
            init: self.init,
        };
        let folder = service.add_folder(&self.path, options).await?;

        println!("Watching {}", folder.path.display());
        print_folder(&folder, true);
        Ok(())
    }
}

/// Clone a repository and watch it
#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Repository URL
    pub url: String,

    /// Directory to clone into (a subdirectory named after the repository is created)
    #[arg(default_value = ".")]
    pub parent: PathBuf,

    /// Branch to check out
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Replace an existing directory at the target
    #[arg(long)]
    pub overwrite: bool,
}

impl CloneArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let request = CloneRequest {
            branch: self.branch.clone(),
            overwrite: self.overwrite,
        };
        let folder = service
            .clone_repository(&self.url, &self.parent, request)
            .await?;

        println!("Cloned into {}", folder.path.display());
        print_folder(&folder, true);
        Ok(())
    }
}

/// Change a folder's settings
#[derive(Args, Debug)]
pub struct EditArgs {
    /// Watched folder
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// New display name
    #[arg(short, long)]
    pub name: Option<String>,

    /// New branch
    #[arg(short, long)]
    pub branch: Option<String>,

    /// New remote URL (empty to remove)
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Push after each commit
    #[arg(long)]
    pub auto_push: Option<bool>,
}

impl EditArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let update = FolderUpdate {
            display_name: self.name.clone(),
            branch: self.branch.clone(),
            remote_url: self.remote.clone(),
            auto_push: self.auto_push,
        };
        let report = service.update_folder(&self.path, update).await?;

        println!("Updated {}", report.folder.path.display());
        print_folder(&report.folder, true);
        for warning in &report.warnings {
            println!("  Warning: {}", warning);
        }
        Ok(())
    }
}

/// Stop watching a folder
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Watched folder
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

impl RemoveArgs {
    pub async fn execute(&self, service: &SyncService) -> anyhow::Result<()> {
        let folder = service.remove_folder(&self.path).await?;
        println!("No longer watching {}", folder.path.display());
        Ok(())
    }
}

/// Print every watched folder
pub fn list(service: &SyncService, verbose: bool) {
    let folders = service.list();
    if folders.is_empty() {
        println!("No folders watched.");
        return;
    }

    for folder in &folders {
        let marker = if folder.dirty { "*" } else { " " };
        println!("{} {} ({})", marker, folder.display_name, folder.path.display());
        print_folder(folder, verbose);
    }
}

fn print_folder(folder: &WatchedFolder, verbose: bool) {
    println!("    Branch:    {}", folder.branch);
    println!(
        "    Remote:    {}",
        folder.remote_url.as_deref().unwrap_or("(none)")
    );
    if !verbose {
        return;
    }
    println!("    Name:      {}", folder.display_name);
    println!("    Auto-push: {}", if folder.auto_push { "on" } else { "off" });
    println!("    Changes:   {}", if folder.dirty { "yes" } else { "no" });
    if let Some(at) = folder.last_commit {
        println!(
            "    Last commit: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    if !folder.repo_open {
        println!("    Repository: not open");
    }
}

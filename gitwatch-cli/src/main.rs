//! gitwatch CLI - watch project folders and keep them in sync with their remotes

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gitwatch_core::{Config, Credentials, SyncService, CURRENT_VERSION};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    AddArgs, BranchesArgs, BrowseArgs, CloneArgs, CommitArgs, EditArgs, PullArgs, RemoveArgs,
    SwitchArgs, UpdateArgs, WatchArgs,
};

/// gitwatch: watch folders for changes and sync them with git remotes
#[derive(Parser, Debug)]
#[command(name = "gitwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the watched-folder state file (overrides config and env)
    #[arg(long, global = true, env = "GITWATCH_STATE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Start watching a folder
    Add(AddArgs),

    /// Clone a repository and watch it
    Clone(CloneArgs),

    /// List watched folders
    #[command(visible_alias = "ls")]
    List,

    /// Change a folder's settings
    Edit(EditArgs),

    /// Stop watching a folder
    #[command(visible_alias = "rm")]
    Remove(RemoveArgs),

    /// Commit (and push) a folder's changes
    Commit(CommitArgs),

    /// Pull a folder's upstream
    Pull(PullArgs),

    /// Switch a folder to another branch
    Switch(SwitchArgs),

    /// List a folder's local and remote branches
    Branches(BranchesArgs),

    /// Watch every folder until interrupted
    Watch(WatchArgs),

    /// Show a GitHub repository and its branches
    Browse(BrowseArgs),

    /// Check for, apply or roll back self-updates
    Update(UpdateArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.state.clone())?;

    if cli.verbose {
        tracing::debug!(
            state = %config.state.path.display(),
            git_timeout = ?config.network.git_timeout,
            "Configuration loaded"
        );
    }

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("gitwatch - keep project folders in sync with their git remotes");
            println!();
            println!("Use --help for usage information");
            return Ok(());
        }
    };

    match command {
        Commands::Version => {
            println!("gitwatch {}", CURRENT_VERSION);
        }
        Commands::Config => show_config(&config),
        Commands::Browse(args) => args.execute(&config, &load_credentials()?).await?,
        Commands::Add(args) => args.execute(&open_service(config)?).await?,
        Commands::Clone(args) => args.execute(&open_service(config)?).await?,
        Commands::List => commands::folder::list(&open_service(config)?, cli.verbose),
        Commands::Edit(args) => args.execute(&open_service(config)?).await?,
        Commands::Remove(args) => args.execute(&open_service(config)?).await?,
        Commands::Commit(args) => args.execute(Arc::new(open_service(config)?)).await?,
        Commands::Pull(args) => args.execute(&open_service(config)?).await?,
        Commands::Switch(args) => args.execute(&open_service(config)?).await?,
        Commands::Branches(args) => args.execute(&open_service(config)?).await?,
        Commands::Watch(args) => args.execute(&open_service(config)?).await?,
        Commands::Update(args) => args.execute(&open_service(config)?).await?,
    }

    Ok(())
}

fn load_credentials() -> anyhow::Result<Credentials> {
    Credentials::load().context("Failed to load credentials")
}

fn open_service(config: Config) -> anyhow::Result<SyncService> {
    Ok(SyncService::open(config, load_credentials()?))
}

fn show_config(config: &Config) {
    println!("gitwatch Configuration");
    println!("======================");
    println!();
    println!("State:");
    println!("  path: {}", config.state.path.display());
    println!();
    println!("Network:");
    println!("  git_timeout: {:?}", config.network.git_timeout);
    println!("  api_timeout: {:?}", config.network.api_timeout);
    println!();
    println!("Watch:");
    match config.watch.debounce {
        Some(debounce) => println!("  debounce: {:?}", debounce),
        None => println!("  debounce: (off)"),
    }
    println!();
    println!("Update:");
    println!(
        "  repo_url: {}",
        config.update.repo_url.as_deref().unwrap_or("(not set)")
    );
    println!("  branch: {}", config.update.branch);
    println!("  version_file: {}", config.update.version_file);
    match config.update.resolve_install_dir() {
        Ok(dir) => println!("  install_dir: {}", dir.display()),
        Err(e) => println!("  install_dir: (unresolved: {})", e),
    }
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
    if let Some(path) = Credentials::default_path() {
        println!("Credentials file: {}", path.display());
    }
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod logging;

use config::AppConfig;

/// Manage stored OAuth credentials: import, inspect, refresh and revoke.
#[derive(Parser)]
#[command(name = "credmgr")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and print it (secrets redacted)
    Check,
    /// List stored identities
    List,
    Acquire(commands::acquire::AcquireArgs),
    Refresh(commands::refresh::RefreshArgs),
    Revoke(commands::revoke::RevokeArgs),
    Import(commands::import::ImportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose)?;
    tracing::debug!(config = ?cli.config, "configuration loaded");

    let credentials = &config.credentials;
    match &cli.command {
        Commands::Check => commands::check::run(&config),
        Commands::List => commands::list::run(credentials).await,
        Commands::Acquire(args) => args.run(credentials).await,
        Commands::Refresh(args) => args.run(credentials).await,
        Commands::Revoke(args) => args.run(credentials).await,
        Commands::Import(args) => args.run(credentials).await,
    }
}

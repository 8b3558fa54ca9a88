//! Tripsync CLI - keep a travel schedule in sync from the terminal
//!
//! Edits land in the local store first and are pushed on `sync` or while
//! `watch` is running.

mod cli;
mod commands;
mod config;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::add::run_add;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::gc::run_gc;
use crate::commands::list::run_list;
use crate::commands::pending::run_pending;
use crate::commands::show::run_show;
use crate::commands::sync::{run_sync, run_sync_conflicts};
use crate::commands::watch::run_watch;
use crate::config::ClientConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        if error.is_storage() {
            eprintln!("The local database could not be read or written; check --db-path or TRIPSYNC_DB_PATH.");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tripsync=info,tripsync_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config = ClientConfig::resolve(cli.config.as_deref()).map_err(CliError::Config)?;

    match cli.command {
        Commands::Add(args) => run_add(&args, &config, &db_path).await?,
        Commands::List { limit, json } => run_list(limit, json, &config, &db_path).await?,
        Commands::Show { id, json } => run_show(&id, json, &db_path).await?,
        Commands::Edit(args) => run_edit(&args, &db_path).await?,
        Commands::Delete { id } => run_delete(&id, &db_path).await?,
        Commands::Pending { json } => run_pending(json, &db_path).await?,
        Commands::Sync { command: None } => run_sync(&config, &db_path).await?,
        Commands::Sync {
            command: Some(SyncCommands::Conflicts { limit, json }),
        } => run_sync_conflicts(limit, json, &db_path).await?,
        Commands::Watch => run_watch(&config, &db_path).await?,
        Commands::Gc => {
            run_gc(&config, &db_path).await?;
        }
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

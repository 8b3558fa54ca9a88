use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tripsync")]
#[command(about = "Keep your travel schedule in sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a schedule entry
    #[command(alias = "new")]
    Add(AddArgs),
    /// List upcoming and past entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one entry
    Show {
        /// Entry ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of an existing entry
    Edit(EditArgs),
    /// Delete an existing entry
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// List local edits waiting to be pushed
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync with the remote schedule store
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Keep syncing in the foreground until interrupted
    Watch,
    /// Remove deleted entries past the retention window
    Gc,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    /// Entry title
    pub title: Vec<String>,
    /// Station, city or address
    #[arg(short, long)]
    pub location: Option<String>,
    /// Departure, e.g. "2026-11-02 07:30" (UTC) or RFC 3339
    #[arg(short, long, value_name = "TIME")]
    pub start: String,
    /// Arrival; defaults to the departure time
    #[arg(short, long, value_name = "TIME")]
    pub end: Option<String>,
    /// Mode of transport
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportArg>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Entry ID or unique ID prefix
    pub id: String,
    /// New title
    #[arg(long)]
    pub title: Option<String>,
    /// New location
    #[arg(short, long)]
    pub location: Option<String>,
    /// New departure time
    #[arg(short, long, value_name = "TIME")]
    pub start: Option<String>,
    /// New arrival time
    #[arg(short, long, value_name = "TIME")]
    pub end: Option<String>,
    /// New mode of transport
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportArg>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum TransportArg {
    Bus,
    Train,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

//! Clap command surface (spec §6 "CLI surface" — the only part outside the
//! core the spec pins). Grounded on `cli-sub-agent::cli::Cli`'s derive shape,
//! narrowed to this spec's four subcommands.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "gcc", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a session and enter the turn loop.
    New {
        goal: String,
        #[arg(long)]
        debug: bool,
    },
    /// Resume the latest session, or a named/prefix-matched one.
    ContinueSession {
        id: Option<String>,
        #[arg(long)]
        debug: bool,
    },
    /// List known sessions.
    ListSessions,
    /// Purge the index and on-disk sessions.
    Reset {
        #[arg(long)]
        nuclear: bool,
    },
}

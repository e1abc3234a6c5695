//! Entry point: parses the CLI surface (spec §6), initializes tracing, and
//! dispatches to the per-subcommand handler. Grounded on
//! `cli-sub-agent::main`'s `#[tokio::main]` + tracing-subscriber +
//! `Cli::parse()` + `match` dispatch shape, narrowed to four subcommands and
//! with `CSA_DEPTH`/weave-migration-warning concerns dropped (not part of
//! this system).

mod cli;
mod handlers;
mod repl;
mod session;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let config = gcc_config::GccConfig::from_env();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.effective_rust_log()))
        .try_init()
        .ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::New { goal, debug } => handlers::handle_new(&config, &goal, debug).await,
        Commands::ContinueSession { id, debug } => {
            handlers::handle_continue_session(&config, id.as_deref(), debug).await
        }
        Commands::ListSessions => handlers::handle_list_sessions(&config, cli.format),
        Commands::Reset { nuclear } => handlers::handle_reset(&config, nuclear),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::exit(1);
        }
    }
}

//! Supa CLI - Local development tooling for managed Postgres.

use clap::Parser;
use miette::Diagnostic;
use tokio_util::sync::CancellationToken;

use supa_cli::cli::{Cli, Command};
use supa_cli::commands;
use supa_cli::config::Project;
use supa_cli::error::CliResult;
use supa_cli::{logging, output};

/// Exit code when interrupted twice
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    tokio::spawn(watch_interrupts(cancel.clone()));

    // Run the CLI and handle errors
    if let Err(e) = run(cli, cancel).await {
        output::newline();
        output::error(&e.to_string());
        if let Some(help) = e.help() {
            output::hint(&help.to_string());
        }
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> CliResult<()> {
    if let Command::Version = cli.command {
        return commands::version::run().await;
    }

    let project = Project::load(cli.workdir)?;

    // Run the appropriate command
    match cli.command {
        Command::Db(args) => commands::db::run(project, args, cancel).await,
        Command::Migration(args) => commands::migration::run(project, args).await,
        Command::Version => commands::version::run().await,
    }
}

/// The first Ctrl-C cancels the running operation so cleanup can finish;
/// the second exits immediately.
async fn watch_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    output::warn("Interrupted; cleaning up (press Ctrl-C again to force exit)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(EXIT_INTERRUPTED);
    }
}

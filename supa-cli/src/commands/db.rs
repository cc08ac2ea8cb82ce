//! `supa db` commands - Local and remote database operations.

use std::io::Write;
use std::sync::Arc;

use supa_migrate::{
    BuildOutcome, EngineOptions, PgExecutor, PgHistory, PushOptions, RemoteMigrator,
    parse_postgres_url,
};
use tokio_util::sync::CancellationToken;

use crate::cli::{DbArgs, DbDiffArgs, DbPushArgs, DbSubcommand};
use crate::commands::{orchestrator, retry_next_second};
use crate::config::Project;
use crate::error::CliResult;
use crate::output::{self, success};

/// Migration name used when the diff is only printed
const DRY_RUN_NAME: &str = "schema_diff";

/// Run the db command
pub async fn run(project: Project, args: DbArgs, cancel: CancellationToken) -> CliResult<()> {
    match args.command {
        DbSubcommand::Diff(diff_args) => run_diff(&project, diff_args, &cancel).await,
        DbSubcommand::Push(push_args) => run_push(&project, push_args, &cancel).await,
        DbSubcommand::Reset => run_reset(&project, &cancel).await,
        DbSubcommand::Dump => run_dump(&project, &cancel).await,
    }
}

/// Run `supa db diff` - write the schema drift as a new migration
async fn run_diff(project: &Project, args: DbDiffArgs, cancel: &CancellationToken) -> CliResult<()> {
    let dry_run = args.dry_run || args.name.is_none();
    let options = EngineOptions {
        dry_run,
        recover: args.recover,
    };
    let engine = orchestrator(project, options)?;
    let name = args.name.unwrap_or_else(|| DRY_RUN_NAME.to_string());

    if !dry_run {
        output::header("Diff");
        output::kv("Migrations", &project.migrations_dir().display().to_string());
        output::kv("Shadow database", &engine.context().shadow_name);
        output::newline();
    }

    match retry_next_second(|now| engine.build_at(&name, now, cancel)).await? {
        BuildOutcome::Written(path) => {
            success(&format!("Wrote new migration {}", path.display()));
        }
        BuildOutcome::NoChanges => {
            output::info("No schema changes found");
        }
        BuildOutcome::DryRun(sql) => {
            print!("{}", sql);
        }
    }
    Ok(())
}

/// Run `supa db push` - apply pending migrations to a remote database
async fn run_push(project: &Project, args: DbPushArgs, cancel: &CancellationToken) -> CliResult<()> {
    output::header("Database Push");

    let url = parse_postgres_url(&args.db_url)?;
    output::kv("Database", &redact(&url));
    output::newline();

    let migrator = RemoteMigrator::new(project.migrations_dir(), Arc::new(PgExecutor::new()))
        .with_seed_path(project.seed_path());
    let history = PgHistory::new(url.as_str());
    let options = PushOptions {
        dry_run: args.dry_run,
        include_seed: args.include_seed,
    };

    let report = migrator.push(&history, url.as_str(), &options, cancel).await?;

    if report.pending.is_empty() {
        success("Remote database is up to date");
    } else {
        output::section(if args.dry_run {
            "Would apply"
        } else {
            "Applied"
        });
        for migration in &report.pending {
            output::list_item(migration);
        }
        output::newline();
        if report.applied {
            success(&format!("Pushed {} migration(s)", report.pending.len()));
        }
    }
    if report.seeded {
        success("Seeded remote database");
    }
    Ok(())
}

/// Run `supa db reset` - recreate the local database
async fn run_reset(project: &Project, cancel: &CancellationToken) -> CliResult<()> {
    output::header("Database Reset");

    let engine = orchestrator(project, EngineOptions::default())?;
    output::step(1, 2, "Recreating local database...");
    let report = engine.reset(cancel).await?;

    output::step(2, 2, "Applied migrations:");
    for migration in &report.applied {
        output::list_item(migration);
    }
    if report.seeded {
        output::list_item("seed.sql");
    }
    output::newline();
    success("Finished resetting the local database");
    Ok(())
}

/// Run `supa db dump` - print the local schema
async fn run_dump(project: &Project, cancel: &CancellationToken) -> CliResult<()> {
    let engine = orchestrator(project, EngineOptions::default())?;
    let dump = engine.dump(cancel).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&dump)?;
    stdout.flush()?;
    Ok(())
}

/// Display form of a URL without its password
fn redact(url: &url::Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() && url.set_password(Some("****")).is_err() {
        return "<invalid url>".to_string();
    }
    url.to_string()
}

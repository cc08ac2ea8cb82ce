//! `supa migration` commands - Migration file management.

use std::sync::Arc;

use supa_migrate::{MigrationWriter, PgExecutor, PgHistory, Reconciliation, RemoteMigrator, parse_postgres_url};

use crate::cli::{MigrationArgs, MigrationListArgs, MigrationNewArgs, MigrationSubcommand};
use crate::commands::retry_next_second;
use crate::config::Project;
use crate::error::CliResult;
use crate::output::{self, style_error, style_pending, style_success, success};

/// Run the migration command
pub async fn run(project: Project, args: MigrationArgs) -> CliResult<()> {
    match args.command {
        MigrationSubcommand::New(new_args) => run_new(&project, new_args).await,
        MigrationSubcommand::List(list_args) => run_list(&project, list_args).await,
    }
}

/// Run `supa migration new` - create an empty migration
async fn run_new(project: &Project, args: MigrationNewArgs) -> CliResult<()> {
    let writer = MigrationWriter::new(project.migrations_dir());
    let path = retry_next_second(|now| writer.write(&args.name, "", now)).await?;
    success(&format!("Created new migration at {}", path.display()));
    Ok(())
}

/// Run `supa migration list` - compare local and remote history
async fn run_list(project: &Project, args: MigrationListArgs) -> CliResult<()> {
    output::header("Migrations");

    let url = parse_postgres_url(&args.db_url)?;
    let migrator = RemoteMigrator::new(project.migrations_dir(), Arc::new(PgExecutor::new()));
    let status = migrator.status(&PgHistory::new(url.as_str())).await?;

    let rows = history_rows(&status.local, &status.remote);
    let width = rows
        .iter()
        .map(|(local, _)| local.len())
        .chain(std::iter::once("LOCAL".len()))
        .max()
        .unwrap_or_default();

    println!("  {:<width$} │ REMOTE", "LOCAL", width = width);
    println!("  {}─┼─{}", "─".repeat(width), "─".repeat(14));
    for (local, remote) in &rows {
        let remote = if remote.is_empty() {
            style_pending("-")
        } else if remote == local {
            style_success(remote)
        } else {
            style_error(remote)
        };
        println!("  {:<width$} │ {}", local, remote, width = width);
    }
    output::newline();

    let summary = status.reconciliation.summary();
    match status.reconciliation {
        Reconciliation::Divergent { .. } => output::warn(&summary),
        _ => success(&summary),
    }
    Ok(())
}

/// Pair local and remote versions by position, padding the shorter side.
fn history_rows(local: &[String], remote: &[String]) -> Vec<(String, String)> {
    let len = local.len().max(remote.len());
    (0..len)
        .map(|i| {
            (
                local.get(i).cloned().unwrap_or_default(),
                remote.get(i).cloned().unwrap_or_default(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(versions: &[&str]) -> Vec<String> {
        versions.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_history_rows_pad_shorter_side() {
        assert_eq!(
            history_rows(&v(&["1", "2"]), &v(&["1"])),
            vec![
                ("1".to_string(), "1".to_string()),
                ("2".to_string(), String::new())
            ]
        );
        assert_eq!(
            history_rows(&v(&[]), &v(&["9"])),
            vec![(String::new(), "9".to_string())]
        );
        assert!(history_rows(&[], &[]).is_empty());
    }
}

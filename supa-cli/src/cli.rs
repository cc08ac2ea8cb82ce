//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Supa CLI - Local development tooling for managed Postgres
#[derive(Parser, Debug)]
#[command(name = "supa")]
#[command(version)]
#[command(about = "Supa CLI - Local development tooling for managed Postgres", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true, env = "SUPA_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the local and remote databases
    Db(DbArgs),

    /// Manage migration files
    Migration(MigrationArgs),

    /// Display version information
    Version,
}

// =============================================================================
// Db Command
// =============================================================================

/// Arguments for the `db` command
#[derive(Args, Debug)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbSubcommand,
}

/// Db subcommands
#[derive(Subcommand, Debug)]
pub enum DbSubcommand {
    /// Diff the local database against the migrations
    Diff(DbDiffArgs),

    /// Push local migrations to a remote database
    Push(DbPushArgs),

    /// Recreate the local database from the migrations and seed
    Reset,

    /// Dump the schema of the local database
    Dump,
}

/// Arguments for `db diff`
#[derive(Args, Debug)]
pub struct DbDiffArgs {
    /// Write the diff as a new migration with this name
    #[arg(short = 'f', long)]
    pub name: Option<String>,

    /// Print the migration instead of writing it
    #[arg(long)]
    pub dry_run: bool,

    /// Drop a shadow database left behind by an interrupted run
    #[arg(long)]
    pub recover: bool,
}

/// Arguments for `db push`
#[derive(Args, Debug)]
pub struct DbPushArgs {
    /// Connection URL of the remote database
    #[arg(long, env = "SUPA_DB_URL", hide_env_values = true)]
    pub db_url: String,

    /// List pending migrations without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Apply the seed file after the migrations
    #[arg(long)]
    pub include_seed: bool,
}

// =============================================================================
// Migration Command
// =============================================================================

/// Arguments for the `migration` command
#[derive(Args, Debug)]
pub struct MigrationArgs {
    #[command(subcommand)]
    pub command: MigrationSubcommand,
}

/// Migration subcommands
#[derive(Subcommand, Debug)]
pub enum MigrationSubcommand {
    /// Create an empty migration file
    New(MigrationNewArgs),

    /// Compare local migrations with remote history
    List(MigrationListArgs),
}

/// Arguments for `migration new`
#[derive(Args, Debug)]
pub struct MigrationNewArgs {
    /// Name of the migration
    pub name: String,
}

/// Arguments for `migration list`
#[derive(Args, Debug)]
pub struct MigrationListArgs {
    /// Connection URL of the remote database
    #[arg(long, env = "SUPA_DB_URL", hide_env_values = true)]
    pub db_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_db_diff() {
        let cli = Cli::try_parse_from(["supa", "--workdir", "/tmp/p", "db", "diff", "-f", "add_x", "--recover"])
            .unwrap();
        assert_eq!(cli.workdir, Some(PathBuf::from("/tmp/p")));
        match cli.command {
            Command::Db(DbArgs {
                command: DbSubcommand::Diff(args),
            }) => {
                assert_eq!(args.name.as_deref(), Some("add_x"));
                assert!(args.recover);
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_push_flags() {
        let cli = Cli::try_parse_from([
            "supa",
            "db",
            "push",
            "--db-url",
            "postgresql://postgres@db.example.com/postgres",
            "--dry-run",
            "--include-seed",
        ])
        .unwrap();
        match cli.command {
            Command::Db(DbArgs {
                command: DbSubcommand::Push(args),
            }) => {
                assert!(args.dry_run);
                assert!(args.include_seed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

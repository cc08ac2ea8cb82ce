//! CLI error types and result alias.

use miette::Diagnostic;
use supa_migrate::MigrationError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(supa::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(supa::config))]
    Config(String),

    /// Invalid command line input
    #[error("Invalid input: {0}")]
    #[diagnostic(code(supa::input))]
    Input(String),

    /// Local stack is not usable
    #[error("{0}")]
    #[diagnostic(
        code(supa::preflight),
        help("Start the local stack and make sure the database and differ containers are running.")
    )]
    Preflight(String),

    /// Shadow database error
    #[error("{0}")]
    #[diagnostic(
        code(supa::shadow),
        help("If no other diff is running, rerun with --recover to drop the stale shadow database.")
    )]
    Shadow(String),

    /// Migration error
    #[error("{0}")]
    #[diagnostic(code(supa::migration))]
    Migration(String),

    /// Remote history does not match local migrations
    #[error("{0}")]
    #[diagnostic(
        code(supa::divergent),
        help("Pull the missing migrations into your working tree before pushing.")
    )]
    Divergent(String),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(supa::database))]
    Database(String),

    /// Schema differ error
    #[error("{0}")]
    #[diagnostic(code(supa::differ))]
    Differ(String),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(supa::command))]
    Command(String),

    /// Interrupted by the user
    #[error("Operation cancelled")]
    #[diagnostic(code(supa::cancelled))]
    Cancelled,
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Input(_) => 2,
            CliError::Preflight(_) => 3,
            CliError::Cancelled => 130,
            _ => 1,
        }
    }
}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        let message = err.to_string();
        match err {
            MigrationError::Preflight(msg) => CliError::Preflight(msg),
            MigrationError::ShadowExists(_) | MigrationError::ShadowLifecycle(_) => {
                CliError::Shadow(message)
            }
            MigrationError::Catalog { .. }
            | MigrationError::SqlApply { .. }
            | MigrationError::AlreadyExists(_)
            | MigrationError::Write { .. } => CliError::Migration(message),
            MigrationError::Database(msg) => CliError::Database(msg),
            MigrationError::Differ { .. } | MigrationError::MalformedDiff(_) => {
                CliError::Differ(message)
            }
            MigrationError::Divergent { .. } => CliError::Divergent(message),
            MigrationError::Runtime(_) => CliError::Command(message),
            MigrationError::InvalidInput(msg) => CliError::Input(msg),
            MigrationError::Cancelled => CliError::Cancelled,
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

//! Error types for the migration engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The local stack is not usable (daemon down, container missing).
    #[error("Preflight failed: {0}")]
    Preflight(String),

    /// The migrations directory could not be read.
    #[error("Failed to read migrations directory {path}: {source}")]
    Catalog {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A shadow database with the well-known name already exists.
    #[error("Shadow database '{0}' already exists; another run may be in progress")]
    ShadowExists(String),

    /// Creating or dropping the shadow database failed.
    #[error("Shadow database error: {0}")]
    ShadowLifecycle(String),

    /// A migration (or the seed) failed to apply.
    #[error("Failed to apply {file}: {line}")]
    SqlApply {
        /// File name of the offending migration.
        file: String,
        /// First line of the server error.
        line: String,
    },

    /// Database connection or query error outside of a migration body.
    #[error("Database error: {0}")]
    Database(String),

    /// The external differ exited non-zero.
    #[error("Differ exited with code {code}: {stderr}")]
    Differ {
        /// Exit code reported by the runtime.
        code: i64,
        /// Captured standard error.
        stderr: String,
    },

    /// The differ produced a payload that is not a diff entry array.
    #[error("Malformed differ output: {0}")]
    MalformedDiff(#[from] serde_json::Error),

    /// The target migration file already exists.
    #[error("Migration file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Writing the migration file failed.
    #[error("Failed to write migration {}: {source}", path.display())]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Remote history is not a positional prefix of the local catalog.
    #[error(
        "Remote migration history diverges from local migrations at position {index}: \
         remote has {remote:?}, local has {local:?}"
    )]
    Divergent {
        /// First mismatching position.
        index: usize,
        /// Remote version at that position, if any.
        remote: Option<String>,
        /// Local version at that position, if any.
        local: Option<String>,
    },

    /// The container runtime failed to run a command.
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// Invalid argument (migration name, URL).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The run was interrupted.
    #[error("Operation cancelled")]
    Cancelled,
}

impl MigrationError {
    /// Create a preflight error.
    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }

    /// Create a shadow lifecycle error.
    pub fn shadow(msg: impl Into<String>) -> Self {
        Self::ShadowLifecycle(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an apply error, keeping only the first line of the server message.
    pub fn sql_apply(file: impl Into<String>, message: &str) -> Self {
        Self::SqlApply {
            file: file.into(),
            line: first_line(message),
        }
    }

    /// Check if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if the caller may retry with a fresh timestamp.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<tokio_postgres::Error> for MigrationError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(server_message(&err))
    }
}

/// Extract the most useful message from a driver error.
///
/// Server errors carry the `ERROR: ...` text in `DbError`; everything else
/// falls back to the driver's display output.
pub(crate) fn server_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{}: {} (SQLSTATE {})", db.severity(), db.message(), db.code().code()),
        None => err.to_string(),
    }
}

/// First non-empty line of a message.
pub(crate) fn first_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_apply_keeps_first_line() {
        let err = MigrationError::sql_apply(
            "20220727064247_init.sql",
            "\nERROR: syntax error at or near \"invalid_sql\"\nLINE 3: invalid_sql\n",
        );
        match &err {
            MigrationError::SqlApply { file, line } => {
                assert_eq!(file, "20220727064247_init.sql");
                assert_eq!(line, "ERROR: syntax error at or near \"invalid_sql\"");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("20220727064247_init.sql"));
    }

    #[test]
    fn test_divergent_display() {
        let err = MigrationError::Divergent {
            index: 1,
            remote: Some("C".to_string()),
            local: Some("B".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("position 1"));
        assert!(msg.contains("\"C\""));
        assert!(msg.contains("\"B\""));
    }

    #[test]
    fn test_classification() {
        assert!(MigrationError::Cancelled.is_cancelled());
        assert!(!MigrationError::preflight("down").is_cancelled());
        assert!(MigrationError::AlreadyExists(PathBuf::from("x.sql")).is_recoverable());
        assert!(!MigrationError::shadow("boom").is_recoverable());
    }

    #[test]
    fn test_first_line_of_empty_message() {
        assert_eq!(first_line(""), "");
        assert_eq!(first_line("  \n  second"), "second");
    }
}

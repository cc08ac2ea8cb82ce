//! Persists new migration files.
//!
//! Files are written to a temporary sibling and moved into place with a
//! no-clobber rename, so a reader of the migrations directory never sees a
//! partial file and an existing migration is never replaced.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};

/// Timestamp layout of migration versions.
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// File name for a migration created at `now`.
pub fn migration_file_name(now: DateTime<Utc>, name: &str) -> String {
    format!("{}_{}.sql", now.format(VERSION_FORMAT), name)
}

/// Check that a migration name can be embedded in a file name.
pub fn validate_name(name: &str) -> MigrateResult<()> {
    if name.trim().is_empty() {
        return Err(MigrationError::invalid_input("migration name must not be empty"));
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(MigrationError::invalid_input(format!(
            "migration name '{}' must not contain path separators",
            name
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(MigrationError::invalid_input(format!(
            "migration name '{}' must not contain whitespace",
            name
        )));
    }
    Ok(())
}

/// Writes migration files into one directory.
#[derive(Debug, Clone)]
pub struct MigrationWriter {
    dir: PathBuf,
}

impl MigrationWriter {
    /// Create a writer for `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `contents` as `<now>_<name>.sql`.
    ///
    /// Returns [`MigrationError::AlreadyExists`] if the file is already
    /// there; the caller decides whether to retry with a later timestamp.
    pub async fn write(
        &self,
        name: &str,
        contents: &str,
        now: DateTime<Utc>,
    ) -> MigrateResult<PathBuf> {
        validate_name(name)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| MigrationError::Write {
                path: self.dir.clone(),
                source,
            })?;

        let target = self.dir.join(migration_file_name(now, name));
        let dir = self.dir.clone();
        let path = target.clone();
        let contents = contents.to_owned();

        tokio::task::spawn_blocking(move || persist(&dir, &path, contents.as_bytes()))
            .await
            .map_err(|e| MigrationError::runtime(format!("migration writer task failed: {}", e)))??;

        info!(path = %target.display(), "Wrote migration");
        Ok(target)
    }
}

fn persist(dir: &Path, target: &Path, contents: &[u8]) -> MigrateResult<()> {
    let write_err = |source| MigrationError::Write {
        path: target.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".supa-migration-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    debug!(tmp = %tmp.path().display(), "Writing migration to temporary file");

    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    // On failure the temporary file is owned by the error and removed with it.
    tmp.persist_noclobber(target).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            MigrationError::AlreadyExists(target.to_path_buf())
        } else {
            write_err(e.error)
        }
    })?;
    Ok(())
}

//! Migration catalog: local migration files in version order.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};

static MIGRATION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_(.+)\.sql$").expect("migration filename pattern is valid")
});

/// A migration file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Numeric prefix, compared byte-wise.
    pub version: String,
    /// Remainder of the file name without the extension.
    pub name: String,
    /// Path to the file.
    pub path: PathBuf,
}

impl MigrationFile {
    /// Parse a file name of the form `<version>_<name>.sql`.
    pub fn parse(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let file_name = path.file_name()?.to_str()?;
        let caps = MIGRATION_NAME.captures(file_name)?;
        Some(Self {
            version: caps[1].to_string(),
            name: caps[2].to_string(),
            path: path.clone(),
        })
    }

    /// File name, used to identify the migration in errors.
    pub fn file_name(&self) -> String {
        format!("{}_{}.sql", self.version, self.name)
    }

    /// Read the migration body.
    pub async fn load_script(&self) -> MigrateResult<SqlScript> {
        SqlScript::load(&self.path).await
    }
}

/// A SQL file loaded into memory, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    /// Label used in errors and logs (the file name).
    pub label: String,
    /// Full SQL text.
    pub body: String,
}

impl SqlScript {
    /// Create a script from an in-memory body.
    pub fn new(label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            body: body.into(),
        }
    }

    /// Read a script from disk, labelled with its file name.
    pub async fn load(path: &Path) -> MigrateResult<Self> {
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MigrationError::Catalog {
                path: path.to_path_buf(),
                source,
            })?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { label, body })
    }
}

/// Ordered, immutable list of local migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationCatalog {
    migrations: Vec<MigrationFile>,
}

impl MigrationCatalog {
    /// Load every `<version>_<name>.sql` file in `dir`, sorted by version.
    ///
    /// Files with other names are skipped with a warning. A missing
    /// directory is treated like an empty one.
    pub async fn load(dir: impl AsRef<Path>) -> MigrateResult<Self> {
        let dir = dir.as_ref();
        let catalog_err = |source| MigrationError::Catalog {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Migrations directory does not exist");
                return Ok(Self::default());
            }
            Err(e) => return Err(catalog_err(e)),
        };

        let mut migrations = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(catalog_err)? {
            let file_type = entry.file_type().await.map_err(catalog_err)?;
            if !file_type.is_file() {
                continue;
            }
            let path = entry.path();
            match MigrationFile::parse(&path) {
                Some(migration) => migrations.push(migration),
                None => warn!(
                    file = %entry.file_name().to_string_lossy(),
                    "Skipping migration with invalid name; expected <version>_<name>.sql"
                ),
            }
        }

        Self::from_files(migrations)
    }

    /// Build a catalog from already-parsed files.
    pub fn from_files(mut migrations: Vec<MigrationFile>) -> MigrateResult<Self> {
        migrations.sort_by(|a, b| a.version.as_bytes().cmp(b.version.as_bytes()));

        if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(MigrationError::invalid_input(format!(
                "duplicate migration version {}: {} and {}",
                pair[0].version,
                pair[0].file_name(),
                pair[1].file_name()
            )));
        }

        Ok(Self { migrations })
    }

    /// Migrations in ascending version order.
    pub fn migrations(&self) -> &[MigrationFile] {
        &self.migrations
    }

    /// Versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(|m| m.version.as_str())
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Migrations after the first `applied` entries.
    pub fn pending_after(&self, applied: usize) -> &[MigrationFile] {
        self.migrations.get(applied..).unwrap_or_default()
    }
}

//! Pushing local migrations to a remote database.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{check_cancelled, load_seed};
use crate::error::MigrateResult;
use crate::executor::SqlExecutor;
use crate::file::MigrationCatalog;
use crate::history::{HistoryRepository, Reconciliation, reconcile};

/// Local and remote migration history side by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Local versions in order.
    pub local: Vec<String>,
    /// Remote versions in order.
    pub remote: Vec<String>,
    /// Verdict of comparing the two.
    pub reconciliation: Reconciliation,
}

/// Options for [`RemoteMigrator::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// List pending migrations without applying them.
    pub dry_run: bool,
    /// Apply the seed file after the migrations.
    pub include_seed: bool,
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// File names of migrations that are (or, on a dry run, would be) applied.
    pub pending: Vec<String>,
    /// Whether anything was applied.
    pub applied: bool,
    /// Whether the seed file was applied.
    pub seeded: bool,
}

/// Applies local migrations to a remote database and records them.
pub struct RemoteMigrator {
    migrations_dir: PathBuf,
    seed_path: Option<PathBuf>,
    executor: Arc<dyn SqlExecutor>,
}

impl RemoteMigrator {
    /// Create a migrator reading migrations from `migrations_dir`.
    pub fn new(migrations_dir: impl Into<PathBuf>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            seed_path: None,
            executor,
        }
    }

    /// Seed file applied with [`PushOptions::include_seed`].
    pub fn with_seed_path(mut self, path: Option<PathBuf>) -> Self {
        self.seed_path = path;
        self
    }

    /// Compare remote history with the local catalog.
    pub async fn status(&self, history: &dyn HistoryRepository) -> MigrateResult<MigrationStatus> {
        let catalog = MigrationCatalog::load(&self.migrations_dir).await?;
        let remote = history.load_versions().await?;
        let reconciliation = reconcile(&remote, &catalog);
        Ok(MigrationStatus {
            local: catalog.versions().map(str::to_string).collect(),
            remote,
            reconciliation,
        })
    }

    /// Apply every local migration the remote has not seen.
    ///
    /// Each migration and its history row commit together. A divergent
    /// history is an error and nothing is applied.
    pub async fn push(
        &self,
        history: &dyn HistoryRepository,
        db_url: &str,
        options: &PushOptions,
        cancel: &CancellationToken,
    ) -> MigrateResult<PushReport> {
        let catalog = MigrationCatalog::load(&self.migrations_dir).await?;
        let remote = history.load_versions().await?;
        let verdict = reconcile(&remote, &catalog).into_result()?;
        info!(verdict = %verdict.summary(), "Reconciled migration history");

        let pending = catalog.pending_after(remote.len());
        let mut report = PushReport {
            pending: pending.iter().map(|m| m.file_name()).collect(),
            ..Default::default()
        };
        if options.dry_run {
            return Ok(report);
        }

        for migration in pending {
            check_cancelled(cancel)?;
            let script = migration.load_script().await?;
            info!(migration = %script.label, "Pushing migration");
            self.executor
                .apply_and_record(db_url, &script, &migration.version, cancel)
                .await?;
            report.applied = true;
        }

        if options.include_seed {
            if let Some(script) = load_seed(self.seed_path.as_deref()).await? {
                check_cancelled(cancel)?;
                info!(seed = %script.label, "Seeding remote database");
                self.executor.apply(db_url, &script, cancel).await?;
                report.seeded = true;
            }
        }
        Ok(report)
    }
}

//! Orchestrates the local schema diff pipeline.
//!
//! `build(name)` runs, in order: preflight, shadow creation, population of
//! the shadow from the migration catalog, diff of the working database
//! against the shadow, filtering, and writing the new migration. The shadow
//! database is released on every exit path, including errors, cancellation
//! and panics.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::container::{ContainerRuntime, ContainerStatus};
use crate::context::CoreContext;
use crate::diff::DiffRunner;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::SqlExecutor;
use crate::file::{MigrationCatalog, SqlScript};
use crate::filter::{DiffFilter, render_migration};
use crate::shadow::{ShadowDatabase, ShadowLifecycle, create_database, drop_database};
use crate::writer::{MigrationWriter, validate_name};

/// Options for the diff pipeline.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Render the migration without writing it.
    pub dry_run: bool,
    /// Drop a shadow database left behind by an earlier run before starting.
    pub recover: bool,
}

/// Result of [`Orchestrator::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new migration was written.
    Written(PathBuf),
    /// The working database matches the migrations.
    NoChanges,
    /// Dry run: the migration that would have been written.
    DryRun(String),
}

/// Result of [`Orchestrator::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    /// File names of the applied migrations.
    pub applied: Vec<String>,
    /// Whether the seed file was applied.
    pub seeded: bool,
}

/// The local migration orchestrator.
pub struct Orchestrator {
    ctx: CoreContext,
    runtime: Arc<dyn ContainerRuntime>,
    executor: Arc<dyn SqlExecutor>,
    shadow: ShadowLifecycle,
    differ: DiffRunner,
    filter: DiffFilter,
    writer: MigrationWriter,
    options: EngineOptions,
}

impl Orchestrator {
    /// Create an orchestrator for the stack described by `ctx`.
    pub fn new(
        ctx: CoreContext,
        runtime: Arc<dyn ContainerRuntime>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        let shadow = ShadowLifecycle::new(Arc::clone(&runtime), ctx.db_user.clone());
        let differ = DiffRunner::new(Arc::clone(&runtime), ctx.differ_container_id.clone());
        let writer = MigrationWriter::new(&ctx.migrations_dir);
        Self {
            ctx,
            runtime,
            executor,
            shadow,
            differ,
            filter: DiffFilter::new(),
            writer,
            options: EngineOptions::default(),
        }
    }

    /// Override the differ argv prefix.
    pub fn with_differ_command(mut self, command: Vec<String>) -> Self {
        self.differ = self.differ.with_command(command);
        self
    }

    /// Use a custom diff filter.
    pub fn with_filter(mut self, filter: DiffFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set pipeline options.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// The context this orchestrator runs against.
    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    /// Check that the runtime answers and both containers are running.
    pub async fn preflight(&self) -> MigrateResult<()> {
        match tokio::time::timeout(self.ctx.ping_timeout, self.runtime.ping()).await {
            Err(_) => {
                return Err(MigrationError::preflight(format!(
                    "container runtime did not respond within {}s",
                    self.ctx.ping_timeout.as_secs_f32()
                )));
            }
            Ok(Err(MigrationError::Runtime(msg))) => {
                return Err(MigrationError::preflight(msg));
            }
            Ok(result) => result?,
        }

        for container in [&self.ctx.db_container_id, &self.ctx.differ_container_id] {
            match self.runtime.inspect(container).await? {
                ContainerStatus::Running => debug!(container = %container, "Container is running"),
                ContainerStatus::Stopped => {
                    return Err(MigrationError::preflight(format!(
                        "container {} is not running; start the local stack first",
                        container
                    )));
                }
                ContainerStatus::Missing => {
                    return Err(MigrationError::preflight(format!(
                        "container {} not found; is the local stack running?",
                        container
                    )));
                }
            }
        }
        Ok(())
    }

    /// Diff the working database against the migrations and write the
    /// difference as `<now>_<name>.sql`.
    pub async fn build(&self, name: &str, cancel: &CancellationToken) -> MigrateResult<BuildOutcome> {
        self.build_at(name, Utc::now(), cancel).await
    }

    /// [`Orchestrator::build`] with an explicit timestamp for the new file.
    #[instrument(skip(self, cancel), fields(shadow = %self.ctx.shadow_name))]
    pub async fn build_at(
        &self,
        name: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> MigrateResult<BuildOutcome> {
        validate_name(name)?;
        self.preflight().await?;
        check_cancelled(cancel)?;

        let catalog = MigrationCatalog::load(&self.ctx.migrations_dir).await?;
        info!(migrations = catalog.len(), "Loaded local migrations");

        if self.options.recover {
            self.shadow
                .ensure_dropped(&self.ctx.db_container_id, &self.ctx.shadow_name)
                .await?;
        }

        let mut shadow = self
            .shadow
            .create(&self.ctx.db_container_id, &self.ctx.shadow_name, cancel)
            .await?;

        let result = AssertUnwindSafe(self.diff_against_shadow(&mut shadow, &catalog, name, now, cancel))
            .catch_unwind()
            .await;

        self.shadow.release(shadow).await;

        match result {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn diff_against_shadow(
        &self,
        shadow: &mut ShadowDatabase,
        catalog: &MigrationCatalog,
        name: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> MigrateResult<BuildOutcome> {
        self.apply_catalog(&self.ctx.shadow_url(), catalog, cancel)
            .await?;
        shadow.mark_ready()?;
        check_cancelled(cancel)?;

        info!("Diffing working database against shadow database");
        let raw = self
            .differ
            .diff(
                self.ctx.network_db_url.as_str(),
                &self.ctx.network_shadow_url(),
                cancel,
            )
            .await?;
        let ddls = self.filter.filter(&raw)?;

        let Some(contents) = render_migration(&ddls) else {
            info!("No schema changes found");
            return Ok(BuildOutcome::NoChanges);
        };

        if self.options.dry_run {
            return Ok(BuildOutcome::DryRun(contents));
        }

        check_cancelled(cancel)?;
        let path = self.writer.write(name, &contents, now).await?;
        Ok(BuildOutcome::Written(path))
    }

    /// Apply every catalog migration to `db_url`, in version order.
    async fn apply_catalog(
        &self,
        db_url: &str,
        catalog: &MigrationCatalog,
        cancel: &CancellationToken,
    ) -> MigrateResult<Vec<String>> {
        let mut applied = Vec::with_capacity(catalog.len());
        for migration in catalog.migrations() {
            check_cancelled(cancel)?;
            let script = migration.load_script().await?;
            info!(migration = %script.label, "Applying migration");
            self.executor.apply(db_url, &script, cancel).await?;
            applied.push(script.label);
        }
        Ok(applied)
    }

    /// Recreate the working database from the migrations and the seed.
    #[instrument(skip(self, cancel), fields(database = %self.ctx.working_db_name()))]
    pub async fn reset(&self, cancel: &CancellationToken) -> MigrateResult<ResetReport> {
        self.preflight().await?;
        check_cancelled(cancel)?;
        let catalog = MigrationCatalog::load(&self.ctx.migrations_dir).await?;

        let container = &self.ctx.db_container_id;
        let database = self.ctx.working_db_name();
        info!("Recreating working database");
        drop_database(self.runtime.as_ref(), container, &self.ctx.db_user, database).await?;
        create_database(
            self.runtime.as_ref(),
            container,
            &self.ctx.db_user,
            database,
            cancel,
        )
        .await?;

        let db_url = self.ctx.db_url.as_str();
        let applied = self.apply_catalog(db_url, &catalog, cancel).await?;
        let seeded = self.apply_seed(db_url, cancel).await?;
        Ok(ResetReport { applied, seeded })
    }

    /// Apply the seed file, if configured and present.
    pub async fn apply_seed(&self, db_url: &str, cancel: &CancellationToken) -> MigrateResult<bool> {
        let Some(script) = load_seed(self.ctx.seed_path.as_deref()).await? else {
            return Ok(false);
        };
        check_cancelled(cancel)?;
        info!(seed = %script.label, "Seeding database");
        self.executor.apply(db_url, &script, cancel).await?;
        Ok(true)
    }

    /// Dump per-object DDL of the working database.
    pub async fn dump(&self, cancel: &CancellationToken) -> MigrateResult<Vec<u8>> {
        self.preflight().await?;
        self.differ
            .dump(self.ctx.network_db_url.as_str(), cancel)
            .await
    }
}

/// Load the seed script, or `None` when unset or missing on disk.
pub async fn load_seed(path: Option<&std::path::Path>) -> MigrateResult<Option<SqlScript>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|source| MigrationError::Catalog {
            path: path.to_path_buf(),
            source,
        })?;
    if !exists {
        debug!(seed = %path.display(), "No seed file");
        return Ok(None);
    }
    SqlScript::load(path).await.map(Some)
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> MigrateResult<()> {
    if cancel.is_cancelled() {
        Err(MigrationError::Cancelled)
    } else {
        Ok(())
    }
}

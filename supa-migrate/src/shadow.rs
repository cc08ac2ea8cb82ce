//! Shadow database lifecycle.
//!
//! The shadow database is a throwaway database inside the local DB
//! container. All local migrations are applied to it so its schema can be
//! diffed against the working database.
//!
//! # Lifecycle
//!
//! ```text
//! absent ──▶ creating ──▶ populating ──▶ ready ──▶ dropping ──▶ absent
//!               │              │                      ▲
//!               └──▶ absent    └──────────────────────┘
//! ```
//!
//! Databases are created and dropped with `createdb`/`dropdb` run inside
//! the container, so the engine never needs superuser credentials on the
//! host side.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::container::ContainerRuntime;
use crate::error::{MigrateResult, MigrationError};

/// Database `createdb`/`dropdb` connect to, so `postgres` itself can be
/// dropped and recreated.
const MAINTENANCE_DB: &str = "template1";

/// Current state of a shadow database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    /// No database exists.
    Absent,
    /// `createdb` is running.
    Creating,
    /// Migrations are being applied.
    Populating,
    /// All migrations applied; ready to diff.
    Ready,
    /// `dropdb` is running.
    Dropping,
}

impl ShadowState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ShadowState) -> bool {
        use ShadowState::*;
        matches!(
            (self, next),
            (Absent, Creating)
                | (Creating, Populating)
                | (Creating, Absent)
                | (Populating, Ready)
                | (Populating, Dropping)
                | (Ready, Dropping)
                | (Dropping, Absent)
        )
    }
}

/// A shadow database owned by one orchestration run.
///
/// Must be handed back to [`ShadowLifecycle::release`]. If the handle is
/// dropped while the database may still exist (for example because the
/// owning future was aborted), a best-effort `dropdb` is spawned on the
/// current runtime.
pub struct ShadowDatabase {
    container: String,
    name: String,
    state: ShadowState,
    runtime: Arc<dyn ContainerRuntime>,
    user: String,
}

impl std::fmt::Debug for ShadowDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowDatabase")
            .field("container", &self.container)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl ShadowDatabase {
    /// Name of the shadow database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container holding the shadow database.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Current state.
    pub fn state(&self) -> ShadowState {
        self.state
    }

    /// Mark population as complete.
    pub fn mark_ready(&mut self) -> MigrateResult<()> {
        self.transition(ShadowState::Ready)
    }

    fn transition(&mut self, next: ShadowState) -> MigrateResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(MigrationError::shadow(format!(
                "invalid shadow database transition {:?} -> {:?}",
                self.state, next
            )));
        }
        debug!(shadow = %self.name, from = ?self.state, to = ?next, "Shadow database transition");
        self.state = next;
        Ok(())
    }
}

impl Drop for ShadowDatabase {
    fn drop(&mut self) {
        if self.state == ShadowState::Absent {
            return;
        }

        warn!(
            shadow = %self.name,
            state = ?self.state,
            "Shadow database was not released; dropping it in the background"
        );

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let runtime = Arc::clone(&self.runtime);
            let container = self.container.clone();
            let argv = dropdb_argv(&self.user, &self.name);
            handle.spawn(async move {
                if let Err(e) = runtime
                    .exec(&container, &argv, &CancellationToken::new())
                    .await
                {
                    warn!(error = %e, "Background shadow drop failed");
                }
            });
        }
    }
}

/// Creates and drops shadow databases inside the DB container.
#[derive(Clone)]
pub struct ShadowLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    user: String,
}

impl ShadowLifecycle {
    /// Create a lifecycle manager running `createdb`/`dropdb` as `user`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, user: impl Into<String>) -> Self {
        Self {
            runtime,
            user: user.into(),
        }
    }

    /// Create the shadow database.
    ///
    /// Fails with [`MigrationError::ShadowExists`] when a database of the
    /// same name is already present; it is never reused.
    pub async fn create(
        &self,
        container: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> MigrateResult<ShadowDatabase> {
        let mut shadow = ShadowDatabase {
            container: container.to_string(),
            name: name.to_string(),
            state: ShadowState::Absent,
            runtime: Arc::clone(&self.runtime),
            user: self.user.clone(),
        };
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        shadow.transition(ShadowState::Creating)?;

        // createdb runs to completion so its outcome is known: a database
        // that already existed belongs to another run and is never dropped.
        let uncancellable = CancellationToken::new();
        match create_database(self.runtime.as_ref(), container, &self.user, name, &uncancellable)
            .await
        {
            Ok(()) => {
                info!(shadow = %name, container, "Created shadow database");
                shadow.transition(ShadowState::Populating)?;
                if cancel.is_cancelled() {
                    self.release(shadow).await;
                    return Err(MigrationError::Cancelled);
                }
                Ok(shadow)
            }
            Err(e) => {
                shadow.transition(ShadowState::Absent)?;
                Err(e)
            }
        }
    }

    /// Drop a database by name. Succeeds if it does not exist.
    pub async fn drop(&self, container: &str, name: &str) -> MigrateResult<()> {
        drop_database(self.runtime.as_ref(), container, &self.user, name).await
    }

    /// Remove a shadow database left behind by an earlier crashed run.
    pub async fn ensure_dropped(&self, container: &str, name: &str) -> MigrateResult<()> {
        debug!(shadow = %name, "Ensuring no stale shadow database exists");
        self.drop(container, name).await
    }

    /// Drop the shadow database at the end of a run.
    ///
    /// Errors are logged, never returned: the run's own outcome wins.
    pub async fn release(&self, mut shadow: ShadowDatabase) {
        if shadow.state != ShadowState::Dropping {
            if let Err(e) = shadow.transition(ShadowState::Dropping) {
                warn!(error = %e, "Releasing shadow database from unexpected state");
                shadow.state = ShadowState::Dropping;
            }
        }

        match self.drop(&shadow.container, &shadow.name).await {
            Ok(()) => info!(shadow = %shadow.name, "Dropped shadow database"),
            Err(e) => warn!(shadow = %shadow.name, error = %e, "Failed to drop shadow database"),
        }
        shadow.state = ShadowState::Absent;
    }
}

/// `createdb` inside the DB container.
pub(crate) async fn create_database(
    runtime: &dyn ContainerRuntime,
    container: &str,
    user: &str,
    name: &str,
    cancel: &CancellationToken,
) -> MigrateResult<()> {
    let argv = vec![
        "createdb".to_string(),
        "--maintenance-db".to_string(),
        MAINTENANCE_DB.to_string(),
        "--username".to_string(),
        user.to_string(),
        name.to_string(),
    ];
    let out = runtime.exec(container, &argv, cancel).await?;
    if out.success() {
        return Ok(());
    }

    let stderr = out.stderr_string();
    if stderr.contains("already exists") {
        Err(MigrationError::ShadowExists(name.to_string()))
    } else {
        Err(MigrationError::shadow(format!(
            "createdb {} failed: {}",
            name, stderr
        )))
    }
}

/// `dropdb --if-exists --force` inside the DB container.
///
/// Never cancellable: it runs on cleanup paths after cancellation.
pub(crate) async fn drop_database(
    runtime: &dyn ContainerRuntime,
    container: &str,
    user: &str,
    name: &str,
) -> MigrateResult<()> {
    let argv = dropdb_argv(user, name);
    let out = runtime
        .exec(container, &argv, &CancellationToken::new())
        .await?;
    if out.success() {
        Ok(())
    } else {
        Err(MigrationError::shadow(format!(
            "dropdb {} failed: {}",
            name,
            out.stderr_string()
        )))
    }
}

fn dropdb_argv(user: &str, name: &str) -> Vec<String> {
    vec![
        "dropdb".to_string(),
        "--if-exists".to_string(),
        "--force".to_string(),
        "--maintenance-db".to_string(),
        MAINTENANCE_DB.to_string(),
        "--username".to_string(),
        user.to_string(),
        name.to_string(),
    ]
}

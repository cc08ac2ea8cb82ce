//! CLI command implementations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use supa_migrate::{DockerCli, EngineOptions, MigrateResult, Orchestrator, PgExecutor};
use tracing::warn;

use crate::config::Project;
use crate::error::CliResult;

pub mod db;
pub mod migration;
pub mod version;

/// Build an orchestrator for the project's local stack.
pub(crate) fn orchestrator(project: &Project, options: EngineOptions) -> CliResult<Orchestrator> {
    let engine = Orchestrator::new(
        project.core_context()?,
        Arc::new(DockerCli::new()),
        Arc::new(PgExecutor::new()),
    )
    .with_differ_command(project.config.differ.command.clone())
    .with_options(options);
    Ok(engine)
}

/// Run `op` with the current time; if its file name collides with an
/// existing migration, wait for the next second and try once more.
pub(crate) async fn retry_next_second<T, F, Fut>(mut op: F) -> CliResult<T>
where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = MigrateResult<T>>,
{
    let first = Utc::now();
    match op(first).await {
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "Migration timestamp collided; retrying");
            let next = DateTime::from_timestamp(first.timestamp() + 1, 0).unwrap_or(first);
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            Ok(op(Utc::now().max(next)).await?)
        }
        result => Ok(result?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use std::path::PathBuf;
    use supa_migrate::MigrationError;

    #[tokio::test]
    async fn test_retry_uses_a_later_second() {
        let mut seen = Vec::new();
        let result = retry_next_second(|now| {
            seen.push(now);
            let collide = seen.len() == 1;
            async move {
                if collide {
                    Err(MigrationError::AlreadyExists(PathBuf::from("x.sql")))
                } else {
                    Ok(now)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert!(result.timestamp() > seen[0].timestamp());
    }

    #[tokio::test]
    async fn test_retry_only_once() {
        let mut calls = 0;
        let err = retry_next_second(|_| {
            calls += 1;
            async { Err::<(), _>(MigrationError::AlreadyExists(PathBuf::from("x.sql"))) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(matches!(err, CliError::Migration(_)));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let err = retry_next_second(|_| {
            calls += 1;
            async { Err::<(), _>(MigrationError::Cancelled) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, CliError::Cancelled));
    }
}

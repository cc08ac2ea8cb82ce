//! Transactional application of SQL files.

use std::sync::OnceLock;

use async_trait::async_trait;
use tokio_postgres::{CancelToken, Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError, server_message};
use crate::file::SqlScript;
use crate::history::INSERT_VERSION_SQL;

/// Applies one SQL file as one transaction.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run `script` inside `BEGIN; ... COMMIT;` against `db_url`.
    ///
    /// On the first server error the transaction is rolled back and
    /// [`MigrationError::SqlApply`] names the script.
    async fn apply(
        &self,
        db_url: &str,
        script: &SqlScript,
        cancel: &CancellationToken,
    ) -> MigrateResult<()>;

    /// Like [`SqlExecutor::apply`], and records `version` in the migration
    /// history table within the same transaction.
    async fn apply_and_record(
        &self,
        db_url: &str,
        script: &SqlScript,
        version: &str,
        cancel: &CancellationToken,
    ) -> MigrateResult<()>;
}

/// Connect to a database and drive the connection on a background task.
pub async fn connect(db_url: &str) -> MigrateResult<Client> {
    let (client, connection) = tokio_postgres::connect(db_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "Postgres connection closed with error");
        }
    });
    Ok(client)
}

/// [`SqlExecutor`] backed by `tokio-postgres`.
#[derive(Debug, Clone, Default)]
pub struct PgExecutor;

impl PgExecutor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        db_url: &str,
        script: &SqlScript,
        version: Option<&str>,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let pg_cancel: OnceLock<CancelToken> = OnceLock::new();
        let apply_err = |e: tokio_postgres::Error| {
            MigrationError::sql_apply(&script.label, &server_message(&e))
        };

        let work = async {
            let mut client = connect(db_url).await?;
            let _ = pg_cancel.set(client.cancel_token());

            debug!(script = %script.label, "Applying SQL file");
            let txn = client.transaction().await?;
            txn.batch_execute(&script.body).await.map_err(apply_err)?;
            if let Some(version) = version {
                txn.execute(INSERT_VERSION_SQL, &[&version])
                    .await
                    .map_err(apply_err)?;
            }
            txn.commit().await.map_err(apply_err)?;
            Ok::<(), MigrationError>(())
        };

        tokio::select! {
            result = work => result,
            _ = cancel.cancelled() => {
                // Stop the statement on the server; the open transaction
                // is rolled back when the connection goes away. Nothing to
                // stop if the connection was still being established.
                if let Some(pg_cancel) = pg_cancel.get() {
                    if let Err(e) = pg_cancel.cancel_query(NoTls).await {
                        warn!(error = %e, "Failed to cancel running statement");
                    }
                }
                Err(MigrationError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn apply(
        &self,
        db_url: &str,
        script: &SqlScript,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        self.run(db_url, script, None, cancel).await
    }

    async fn apply_and_record(
        &self,
        db_url: &str,
        script: &SqlScript,
        version: &str,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        self.run(db_url, script, Some(version), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = PgExecutor::new()
            .apply(
                "postgresql://postgres@127.0.0.1:1/postgres",
                &SqlScript::new("1_init.sql", "select 1"),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_while_connecting() {
        // Accepts TCP connections but never answers the startup message.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!(
            "postgresql://postgres@127.0.0.1:{}/postgres",
            listener.local_addr().unwrap().port()
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let executor = PgExecutor::new();
        let script = SqlScript::new("1_init.sql", "select 1");
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            executor.apply(&url, &script, &cancel),
        )
        .await
        .expect("cancellation was not observed during connect");
        assert!(result.unwrap_err().is_cancelled());
        drop(listener);
    }

    #[tokio::test]
    async fn test_connection_failure_is_database_error() {
        let err = PgExecutor::new()
            .apply(
                "postgresql://postgres@127.0.0.1:1/postgres?connect_timeout=1",
                &SqlScript::new("1_init.sql", "select 1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}

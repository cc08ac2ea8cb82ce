//! Remote migration history and reconciliation against local files.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};
use crate::executor::connect;
use crate::file::MigrationCatalog;

/// Schema that holds the history table.
pub const MIGRATIONS_SCHEMA: &str = "supabase_migrations";

/// Fully qualified history table.
pub const MIGRATIONS_TABLE: &str = "supabase_migrations.schema_migrations";

/// Creates the history schema and table.
pub const BOOTSTRAP_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS supabase_migrations;
CREATE TABLE IF NOT EXISTS supabase_migrations.schema_migrations (
    version TEXT NOT NULL PRIMARY KEY
);
"#;

/// Checks whether the history table exists.
pub const TABLE_EXISTS_SQL: &str = "SELECT to_regclass($1::text) IS NOT NULL";

/// Lists applied versions in order.
pub const LIST_VERSIONS_SQL: &str =
    "SELECT version FROM supabase_migrations.schema_migrations ORDER BY version";

/// Records one applied version.
pub const INSERT_VERSION_SQL: &str =
    "INSERT INTO supabase_migrations.schema_migrations (version) VALUES ($1)";

/// Source of the remote database's applied versions.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Applied versions in ascending order.
    ///
    /// Creates the history table first if it does not exist, in which case
    /// the result is empty.
    async fn load_versions(&self) -> MigrateResult<Vec<String>>;
}

/// [`HistoryRepository`] reading `supabase_migrations.schema_migrations`.
#[derive(Debug, Clone)]
pub struct PgHistory {
    db_url: String,
}

impl PgHistory {
    /// Create a repository for the database at `db_url`.
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
        }
    }
}

#[async_trait]
impl HistoryRepository for PgHistory {
    async fn load_versions(&self) -> MigrateResult<Vec<String>> {
        let mut client = connect(&self.db_url).await?;

        let exists: bool = client
            .query_one(TABLE_EXISTS_SQL, &[&MIGRATIONS_TABLE])
            .await?
            .get(0);

        if !exists {
            info!(table = MIGRATIONS_TABLE, "Creating migration history table");
            let txn = client.transaction().await?;
            txn.batch_execute(BOOTSTRAP_SQL).await?;
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let versions: Vec<String> = client
            .query(LIST_VERSIONS_SQL, &[])
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect();
        debug!(count = versions.len(), "Loaded remote migration history");
        Ok(versions)
    }
}

/// Outcome of comparing remote history with the local catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Remote history equals the local catalog.
    OkPrefix,
    /// Remote history is a strict prefix; `pending` local migrations remain.
    BehindLocal {
        /// Number of local migrations not yet applied remotely.
        pending: usize,
    },
    /// Remote history is not a prefix of the local catalog.
    Divergent {
        /// First mismatching position.
        index: usize,
        /// Remote version at that position.
        remote: Option<String>,
        /// Local version at that position.
        local: Option<String>,
    },
}

impl Reconciliation {
    /// Turn a divergence into an error; other outcomes pass through.
    pub fn into_result(self) -> MigrateResult<Self> {
        match self {
            Self::Divergent {
                index,
                remote,
                local,
            } => Err(MigrationError::Divergent {
                index,
                remote,
                local,
            }),
            other => Ok(other),
        }
    }

    /// Number of local migrations the remote has not applied.
    pub fn pending(&self) -> usize {
        match self {
            Self::BehindLocal { pending } => *pending,
            _ => 0,
        }
    }

    /// Short human readable verdict.
    pub fn summary(&self) -> String {
        match self {
            Self::OkPrefix => "Remote database is up to date".to_string(),
            Self::BehindLocal { pending } => {
                format!("{} local migration(s) not yet applied remotely", pending)
            }
            Self::Divergent { index, .. } => {
                format!("Remote history diverges from local migrations at position {index}")
            }
        }
    }
}

/// Check that `remote` is a positional prefix of the local catalog.
///
/// Versions are compared verbatim; the same set in a different order is
/// still divergent.
pub fn reconcile(remote: &[String], local: &MigrationCatalog) -> Reconciliation {
    let local: Vec<&str> = local.versions().collect();

    if remote.len() > local.len() {
        return Reconciliation::Divergent {
            index: local.len(),
            remote: remote.get(local.len()).cloned(),
            local: None,
        };
    }

    if let Some(index) = remote.iter().zip(&local).position(|(r, l)| r != l) {
        return Reconciliation::Divergent {
            index,
            remote: Some(remote[index].clone()),
            local: Some(local[index].to_string()),
        };
    }

    if remote.len() < local.len() {
        Reconciliation::BehindLocal {
            pending: local.len() - remote.len(),
        }
    } else {
        Reconciliation::OkPrefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MigrationFile;
    use pretty_assertions::assert_eq;

    fn catalog(versions: &[&str]) -> MigrationCatalog {
        MigrationCatalog::from_files(
            versions
                .iter()
                .map(|v| MigrationFile::parse(format!("{v}_m.sql")).unwrap())
                .collect(),
        )
        .unwrap()
    }

    fn remote(versions: &[&str]) -> Vec<String> {
        versions.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_reconcile_equal_histories() {
        assert_eq!(
            reconcile(&remote(&["1", "2"]), &catalog(&["1", "2"])),
            Reconciliation::OkPrefix
        );
        assert_eq!(reconcile(&[], &catalog(&[])), Reconciliation::OkPrefix);
    }

    #[test]
    fn test_reconcile_behind_local() {
        assert_eq!(
            reconcile(&remote(&["1"]), &catalog(&["1", "2"])),
            Reconciliation::BehindLocal { pending: 1 }
        );
        assert_eq!(
            reconcile(&[], &catalog(&["1", "2", "3"])),
            Reconciliation::BehindLocal { pending: 3 }
        );
    }

    #[test]
    fn test_reconcile_positional_mismatch() {
        assert_eq!(
            reconcile(&remote(&["1", "3"]), &catalog(&["1", "2", "3"])),
            Reconciliation::Divergent {
                index: 1,
                remote: Some("3".to_string()),
                local: Some("2".to_string()),
            }
        );
    }

    #[test]
    fn test_reconcile_remote_ahead() {
        assert_eq!(
            reconcile(&remote(&["1", "2"]), &catalog(&["1"])),
            Reconciliation::Divergent {
                index: 1,
                remote: Some("2".to_string()),
                local: None,
            }
        );
    }

    #[test]
    fn test_reconcile_same_set_different_order() {
        let verdict = reconcile(&remote(&["2", "1"]), &catalog(&["1", "2"]));
        assert!(matches!(verdict, Reconciliation::Divergent { index: 0, .. }));
    }

    #[test]
    fn test_reconcile_versions_are_not_reformatted() {
        let verdict = reconcile(&remote(&["0001"]), &catalog(&["1"]));
        assert!(matches!(verdict, Reconciliation::Divergent { index: 0, .. }));
    }

    /// Every (remote, local) pair drawn from short histories agrees with
    /// the prefix definition.
    #[test]
    fn test_reconcile_matches_prefix_definition() {
        let pool = ["1", "2", "3"];
        let mut histories: Vec<Vec<&str>> = vec![vec![]];
        for len in 1..=3 {
            let mut next = Vec::new();
            for h in histories.iter().filter(|h| h.len() == len - 1) {
                for v in pool {
                    let mut h = h.clone();
                    h.push(v);
                    next.push(h);
                }
            }
            histories.extend(next);
        }

        for r in &histories {
            for l in histories.iter().filter(|l| {
                let mut sorted = l.to_vec();
                sorted.sort();
                sorted.dedup();
                sorted == **l
            }) {
                let verdict = reconcile(&remote(r), &catalog(l));
                let is_prefix = r.len() <= l.len() && r[..] == l[..r.len()];
                match verdict {
                    Reconciliation::OkPrefix => assert!(is_prefix && r.len() == l.len()),
                    Reconciliation::BehindLocal { pending } => {
                        assert!(is_prefix && r.len() < l.len());
                        assert_eq!(pending, l.len() - r.len());
                    }
                    Reconciliation::Divergent { .. } => assert!(!is_prefix),
                }
            }
        }
    }

    #[test]
    fn test_into_result() {
        assert!(Reconciliation::OkPrefix.into_result().is_ok());
        assert_eq!(
            Reconciliation::BehindLocal { pending: 2 }
                .into_result()
                .unwrap()
                .pending(),
            2
        );
        let err = Reconciliation::Divergent {
            index: 0,
            remote: Some("2".to_string()),
            local: Some("1".to_string()),
        }
        .into_result()
        .unwrap_err();
        assert!(matches!(err, MigrationError::Divergent { index: 0, .. }));
    }

    #[test]
    fn test_bootstrap_sql_shape() {
        assert!(BOOTSTRAP_SQL.contains("CREATE SCHEMA IF NOT EXISTS supabase_migrations"));
        assert!(BOOTSTRAP_SQL.contains("version TEXT NOT NULL PRIMARY KEY"));
        assert!(INSERT_VERSION_SQL.contains("$1"));
        assert!(MIGRATIONS_TABLE.starts_with(MIGRATIONS_SCHEMA));
    }
}

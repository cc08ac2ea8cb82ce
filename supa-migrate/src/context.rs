//! Explicit context threaded through the engine.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{MigrateResult, MigrationError};

/// Default name of the shadow database.
pub const DEFAULT_SHADOW_NAME: &str = "contrib_regression";

/// Everything the engine needs to know about the local stack.
#[derive(Debug, Clone)]
pub struct CoreContext {
    /// Container running the local Postgres.
    pub db_container_id: String,
    /// Container that hosts the differ executable.
    pub differ_container_id: String,
    /// Directory holding `<version>_<name>.sql` files.
    pub migrations_dir: PathBuf,
    /// Optional seed file applied after migrations on reset.
    pub seed_path: Option<PathBuf>,
    /// Well-known shadow database name.
    pub shadow_name: String,
    /// Role used for `createdb`/`dropdb` inside the DB container.
    pub db_user: String,
    /// Working database, as reachable from this host.
    pub db_url: Url,
    /// Working database, as reachable from inside the container network.
    pub network_db_url: Url,
    /// Timeout for the runtime ping during preflight.
    pub ping_timeout: Duration,
}

impl CoreContext {
    /// Create a context from host and network URLs of the working database.
    pub fn new(
        db_container_id: impl Into<String>,
        differ_container_id: impl Into<String>,
        db_url: &str,
        network_db_url: &str,
    ) -> MigrateResult<Self> {
        Ok(Self {
            db_container_id: db_container_id.into(),
            differ_container_id: differ_container_id.into(),
            migrations_dir: PathBuf::from("migrations"),
            seed_path: None,
            shadow_name: DEFAULT_SHADOW_NAME.to_string(),
            db_user: "postgres".to_string(),
            db_url: parse_postgres_url(db_url)?,
            network_db_url: parse_postgres_url(network_db_url)?,
            ping_timeout: Duration::from_secs(5),
        })
    }

    /// Set the migrations directory.
    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the seed file.
    pub fn with_seed_path(mut self, path: Option<PathBuf>) -> Self {
        self.seed_path = path;
        self
    }

    /// Set the shadow database name.
    pub fn with_shadow_name(mut self, name: impl Into<String>) -> Self {
        self.shadow_name = name.into();
        self
    }

    /// Set the admin role used inside the DB container.
    pub fn with_db_user(mut self, user: impl Into<String>) -> Self {
        self.db_user = user.into();
        self
    }

    /// Set the preflight ping timeout.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Name of the working database (the URL path).
    pub fn working_db_name(&self) -> &str {
        self.db_url.path().trim_start_matches('/')
    }

    /// Shadow database URL reachable from this host.
    pub fn shadow_url(&self) -> String {
        with_database(&self.db_url, &self.shadow_name)
    }

    /// Shadow database URL reachable from the differ container.
    pub fn network_shadow_url(&self) -> String {
        with_database(&self.network_db_url, &self.shadow_name)
    }
}

/// Parse and validate a Postgres connection URL.
pub fn parse_postgres_url(raw: &str) -> MigrateResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| MigrationError::invalid_input(format!("invalid database URL: {}", e)))?;

    if url.scheme() != "postgresql" && url.scheme() != "postgres" {
        return Err(MigrationError::invalid_input(format!(
            "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(MigrationError::invalid_input("missing host in database URL"));
    }
    if url.path().trim_start_matches('/').is_empty() {
        return Err(MigrationError::invalid_input(
            "missing database name in database URL",
        ));
    }
    Ok(url)
}

/// Replace the database name of a connection URL.
fn with_database(base: &Url, db_name: &str) -> String {
    let mut url = base.clone();
    url.set_path(&format!("/{}", db_name));
    url.to_string()
}

//! CLI configuration handling.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use supa_migrate::{CoreContext, DEFAULT_DIFFER_COMMAND, DEFAULT_SHADOW_NAME};
use url::Url;

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "supa.toml";

/// Default migrations directory (relative to project root)
pub const MIGRATIONS_DIR: &str = "migrations";

/// Default seed file (relative to project root)
pub const SEED_FILE: &str = "seed.sql";

/// Supa CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local database configuration
    pub db: DbConfig,

    /// Migration configuration
    pub migrations: MigrationsConfig,

    /// Schema differ configuration
    pub differ: DifferConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `supa.toml` from `dir`, falling back to defaults when absent
    pub fn load_or_default(dir: &Path) -> CliResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Local database configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Host port the local database listens on
    pub port: u16,

    /// Superuser name
    pub user: String,

    /// Superuser password
    pub password: String,

    /// Working database name
    pub database: String,

    /// Name of the database container
    pub container: String,

    /// Hostname of the database on the container network (defaults to the
    /// container name)
    pub network_host: Option<String>,

    /// Port of the database on the container network
    pub network_port: u16,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            port: 54322,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
            container: "supabase_db".to_string(),
            network_host: None,
            network_port: 5432,
        }
    }
}

impl DbConfig {
    /// Working database URL as seen from this host
    pub fn url(&self) -> CliResult<Url> {
        self.build_url("127.0.0.1", self.port)
    }

    /// Working database URL as seen from other containers
    pub fn network_url(&self) -> CliResult<Url> {
        let host = self.network_host.as_deref().unwrap_or(&self.container);
        self.build_url(host, self.network_port)
    }

    fn build_url(&self, host: &str, port: u16) -> CliResult<Url> {
        let invalid = |what: &str| CliError::Config(format!("Invalid database {}", what));

        let mut url = Url::parse(&format!("postgresql://{}", host))
            .map_err(|e| CliError::Config(format!("Invalid database host '{}': {}", host, e)))?;
        url.set_port(Some(port)).map_err(|_| invalid("port"))?;
        url.set_username(&self.user).map_err(|_| invalid("user"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| invalid("password"))?;
        url.set_path(&format!("/{}", self.database));
        Ok(url)
    }
}

/// Migration configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory for migration files
    pub directory: String,

    /// Seed file applied after migrations
    pub seed: Option<String>,

    /// Name of the shadow database
    pub shadow_name: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: MIGRATIONS_DIR.to_string(),
            seed: Some(SEED_FILE.to_string()),
            shadow_name: DEFAULT_SHADOW_NAME.to_string(),
        }
    }
}

/// Schema differ configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DifferConfig {
    /// Container hosting the differ
    pub container: String,

    /// Differ invocation inside the container
    pub command: Vec<String>,

    /// Seconds to wait for the container runtime to answer
    pub ping_timeout_secs: u64,
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self {
            container: "supabase_differ".to_string(),
            command: DEFAULT_DIFFER_COMMAND.iter().map(|s| s.to_string()).collect(),
            ping_timeout_secs: 5,
        }
    }
}

/// A project directory with its configuration.
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root
    pub root: PathBuf,
    /// Loaded configuration
    pub config: Config,
}

impl Project {
    /// Load the project at `workdir`, or the current directory.
    pub fn load(workdir: Option<PathBuf>) -> CliResult<Self> {
        let root = match workdir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let config = Config::load_or_default(&root)?;
        Ok(Self { root, config })
    }

    /// Absolute migrations directory
    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join(&self.config.migrations.directory)
    }

    /// Absolute seed file path, if configured
    pub fn seed_path(&self) -> Option<PathBuf> {
        self.config.migrations.seed.as_ref().map(|s| self.root.join(s))
    }

    /// Build the engine context for the local stack
    pub fn core_context(&self) -> CliResult<CoreContext> {
        let db = &self.config.db;
        let ctx = CoreContext::new(
            &db.container,
            &self.config.differ.container,
            db.url()?.as_str(),
            db.network_url()?.as_str(),
        )?
        .with_migrations_dir(self.migrations_dir())
        .with_seed_path(self.seed_path())
        .with_shadow_name(&self.config.migrations.shadow_name)
        .with_db_user(&db.user)
        .with_ping_timeout(Duration::from_secs(self.config.differ.ping_timeout_secs));
        Ok(ctx)
    }
}

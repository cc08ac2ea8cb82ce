//! Runs the external schema differ.
//!
//! The differ lives in its own container and is given Postgres URLs that
//! resolve on the container network. This module only captures its output;
//! interpreting the JSON is the job of [`crate::filter`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::container::ContainerRuntime;
use crate::error::{MigrateResult, MigrationError};

/// Default differ invocation inside the differ container.
pub const DEFAULT_DIFFER_COMMAND: &[&str] = &["schema-diff"];

/// Differ sub-mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// JSON array of diff entries between two databases.
    Diff,
    /// Source DDL per object of a single database.
    Dump,
}

impl DiffMode {
    fn as_arg(self) -> &'static str {
        match self {
            DiffMode::Diff => "diff",
            DiffMode::Dump => "dump",
        }
    }
}

/// Invokes the differ through the container runtime.
#[derive(Clone)]
pub struct DiffRunner {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    command: Vec<String>,
}

impl DiffRunner {
    /// Create a runner for the differ in `container`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container: impl Into<String>) -> Self {
        Self {
            runtime,
            container: container.into(),
            command: DEFAULT_DIFFER_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the differ argv prefix.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.command = command;
        }
        self
    }

    /// Full argv for one invocation.
    pub fn argv(&self, mode: DiffMode, urls: &[&str]) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.push(mode.as_arg().to_string());
        argv.extend(urls.iter().map(|u| u.to_string()));
        argv
    }

    /// Diff `src_url` (working database) against `dst_url` (shadow).
    pub async fn diff(
        &self,
        src_url: &str,
        dst_url: &str,
        cancel: &CancellationToken,
    ) -> MigrateResult<Vec<u8>> {
        self.run(DiffMode::Diff, &[src_url, dst_url], cancel).await
    }

    /// Dump per-object DDL of the database at `url`.
    pub async fn dump(&self, url: &str, cancel: &CancellationToken) -> MigrateResult<Vec<u8>> {
        self.run(DiffMode::Dump, &[url], cancel).await
    }

    async fn run(
        &self,
        mode: DiffMode,
        urls: &[&str],
        cancel: &CancellationToken,
    ) -> MigrateResult<Vec<u8>> {
        let argv = self.argv(mode, urls);
        debug!(container = %self.container, mode = ?mode, "Running differ");

        let out = self.runtime.exec(&self.container, &argv, cancel).await?;
        if !out.success() {
            return Err(MigrationError::Differ {
                code: out.exit_code,
                stderr: out.stderr_string(),
            });
        }

        if !out.stderr.is_empty() {
            debug!(stderr = %out.stderr_string(), "Differ diagnostics");
        }
        Ok(out.stdout)
    }
}

//! Container runtime contract and the Docker CLI implementation.
//!
//! The engine only needs three things from the runtime: a liveness ping,
//! a container status lookup, and `exec` with captured output. Execs are
//! cancellable: on cancellation the process inside the container is
//! terminated, not just the local client.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};

/// Captured result of a container exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
    /// Exit code of the command.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard error as trimmed text.
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Standard output as text.
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Observed container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Container exists and is running.
    Running,
    /// Container exists but is stopped.
    Stopped,
    /// No such container.
    Missing,
}

/// Operations the engine consumes from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime daemon answers.
    async fn ping(&self) -> MigrateResult<()>;

    /// Look up a container by name or id.
    async fn inspect(&self, container: &str) -> MigrateResult<ContainerStatus>;

    /// Run `argv` inside `container`, capturing both output streams.
    ///
    /// Returns [`MigrationError::Cancelled`] once `cancel` fires, after
    /// the in-container process has been stopped.
    async fn exec(
        &self,
        container: &str,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> MigrateResult<ExecOutput>;
}

/// Wrapper script run by `sh -c`: records the child pid in `$0` so a
/// cancelled exec can be terminated from a second exec.
const EXEC_WRAPPER: &str = r#""$@" & pid=$!; echo "$pid" > "$0"; wait "$pid"; code=$?; rm -f "$0"; exit "$code""#;

/// [`ContainerRuntime`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    /// Create a runtime that shells out to `docker`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different client binary (e.g. `podman`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn output(&self, args: &[&str]) -> MigrateResult<ExecOutput> {
        let output = self.command(args).output().await.map_err(|e| {
            MigrationError::runtime(format!("failed to start {}: {}", self.program, e))
        })?;
        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }

    /// Terminate the process recorded in `pid_file` inside `container`.
    async fn terminate(&self, container: &str, pid_file: &str) {
        let script = format!(
            r#"[ -f "{pid_file}" ] && kill -TERM "$(cat "{pid_file}")"; rm -f "{pid_file}""#
        );
        match self.output(&["exec", container, "sh", "-c", &script]).await {
            Ok(out) if out.success() => debug!(container, pid_file, "Terminated cancelled exec"),
            Ok(out) => warn!(
                container,
                stderr = %out.stderr_string(),
                "Failed to terminate cancelled exec"
            ),
            Err(e) => warn!(container, error = %e, "Failed to terminate cancelled exec"),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> MigrateResult<()> {
        let out = self
            .output(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if out.success() {
            debug!(version = %out.stdout_string().trim(), "Container runtime is reachable");
            Ok(())
        } else {
            Err(MigrationError::preflight(format!(
                "container runtime is not reachable: {}",
                out.stderr_string()
            )))
        }
    }

    async fn inspect(&self, container: &str) -> MigrateResult<ContainerStatus> {
        let out = self
            .output(&["inspect", "--format", "{{.State.Running}}", container])
            .await?;
        if !out.success() {
            return Ok(ContainerStatus::Missing);
        }
        Ok(match out.stdout_string().trim() {
            "true" => ContainerStatus::Running,
            _ => ContainerStatus::Stopped,
        })
    }

    async fn exec(
        &self,
        container: &str,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> MigrateResult<ExecOutput> {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let pid_file = format!("/tmp/supa-exec-{}.pid", uuid::Uuid::new_v4().simple());
        let mut args: Vec<&str> =
            vec!["exec", container, "sh", "-c", EXEC_WRAPPER, pid_file.as_str()];
        args.extend(argv.iter().map(String::as_str));

        debug!(container, argv = ?argv, "Running container exec");
        let child = self.command(&args).spawn().map_err(|e| {
            MigrationError::runtime(format!("failed to start {}: {}", self.program, e))
        })?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| {
                    MigrationError::runtime(format!("failed to wait for {}: {}", self.program, e))
                })?;
                Ok(ExecOutput {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                })
            }
            _ = cancel.cancelled() => {
                // The local client is killed when its future is dropped.
                self.terminate(container, &pid_file).await;
                Err(MigrationError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_helpers() {
        let out = ExecOutput {
            stdout: b"[]\n".to_vec(),
            stderr: b"  database \"x\" already exists \n".to_vec(),
            exit_code: 1,
        };
        assert!(!out.success());
        assert_eq!(out.stdout_string(), "[]\n");
        assert_eq!(out.stderr_string(), "database \"x\" already exists");
    }

    #[test]
    fn test_docker_cli_program() {
        let docker = DockerCli::new();
        assert_eq!(docker.program, "docker");
        let podman = DockerCli::new().with_program("podman");
        assert_eq!(podman.program, "podman");
    }

    #[tokio::test]
    async fn test_exec_respects_prior_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = DockerCli::new()
            .exec("db", &["true".to_string()], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_program_is_runtime_error() {
        let runtime = DockerCli::new().with_program("definitely-not-a-container-runtime");
        let err = runtime.ping().await.unwrap_err();
        assert!(matches!(err, MigrationError::Runtime(_)));
    }
}

//! In-memory collaborators for engine tests.
//!
//! [`FakeRuntime`] models the DB container as a map of database name to
//! the statements applied to it. Its differ compares two of those
//! databases, so a migration written by one run is seen as applied by the
//! next. [`FakeExecutor`] applies scripts into the same model.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::container::{ContainerRuntime, ContainerStatus, ExecOutput};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::SqlExecutor;
use crate::file::SqlScript;
use crate::history::HistoryRepository;

/// Split SQL into normalized statements, ignoring `--` comment lines.
pub fn statements(sql: &str) -> Vec<String> {
    let code: Vec<&str> = sql
        .lines()
        .filter(|l| !l.trim_start().starts_with("--"))
        .collect();
    code.join("\n")
        .split(';')
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

fn db_name(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().trim_start_matches('/').to_string())
        .unwrap_or_default()
}

#[derive(Default)]
struct RuntimeState {
    databases: BTreeMap<String, Vec<String>>,
    failures: HashMap<String, String>,
    statuses: HashMap<String, ContainerStatus>,
    differ_output: Option<ExecOutput>,
    differ_hangs: bool,
    ping_error: Option<String>,
    ping_hangs: bool,
    execs: Vec<(String, Vec<String>)>,
}

enum Action {
    Done(MigrateResult<ExecOutput>),
    WaitForCancel,
}

/// Fake container runtime with one DB container.
pub struct FakeRuntime {
    db_container: String,
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    /// A runtime whose DB container holds an empty `postgres` database.
    pub fn new(db_container: &str) -> Self {
        let mut state = RuntimeState::default();
        state.databases.insert("postgres".to_string(), Vec::new());
        Self {
            db_container: db_container.to_string(),
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap()
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.state().databases.contains_key(name)
    }

    pub fn add_database(&self, name: &str) {
        self.state().databases.insert(name.to_string(), Vec::new());
    }

    /// Replace the schema of a database with the statements in `sql`.
    pub fn set_schema(&self, name: &str, sql: &str) {
        self.state()
            .databases
            .insert(name.to_string(), statements(sql));
    }

    pub fn schema(&self, name: &str) -> Option<Vec<String>> {
        self.state().databases.get(name).cloned()
    }

    /// Make every exec of `program` fail with `stderr`.
    pub fn fail_command(&self, program: &str, stderr: &str) {
        self.state()
            .failures
            .insert(program.to_string(), stderr.to_string());
    }

    pub fn set_status(&self, container: &str, status: ContainerStatus) {
        self.state().statuses.insert(container.to_string(), status);
    }

    /// Return `output` from the differ instead of comparing databases.
    pub fn set_differ_output(&self, output: ExecOutput) {
        self.state().differ_output = Some(output);
    }

    /// Make the differ run until cancelled.
    pub fn hang_differ(&self) {
        self.state().differ_hangs = true;
    }

    pub fn fail_ping(&self, message: &str) {
        self.state().ping_error = Some(message.to_string());
    }

    pub fn hang_ping(&self) {
        self.state().ping_hangs = true;
    }

    /// Every exec so far as `(container, argv)`.
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.state().execs.clone()
    }

    /// Apply statements to a database, as one transaction.
    fn apply(&self, db: &str, sql: &str) -> MigrateResult<()> {
        let mut state = self.state();
        let schema = state.databases.get_mut(db).ok_or_else(|| {
            MigrationError::database(format!("FATAL: database \"{}\" does not exist", db))
        })?;
        schema.extend(statements(sql));
        Ok(())
    }

    fn differ(state: &RuntimeState, argv: &[String]) -> ExecOutput {
        let urls: Vec<String> = argv.iter().skip(2).map(|u| db_name(u)).collect();
        let schema = |name: &str| state.databases.get(name).cloned().unwrap_or_default();

        let stdout = match argv.get(1).map(String::as_str) {
            Some("diff") if urls.len() == 2 => {
                let target = schema(&urls[1]);
                let entries: Vec<_> = schema(&urls[0])
                    .into_iter()
                    .filter(|s| !target.contains(s))
                    .map(|s| {
                        json!({
                            "type": "table",
                            "status": "Source Only",
                            "diff_ddl": format!("{};", s),
                            "group_name": "public",
                            "source_schema_name": null,
                            "dependencies": [],
                        })
                    })
                    .collect();
                serde_json::to_vec(&entries).unwrap()
            }
            Some("dump") if urls.len() == 1 => schema(&urls[0])
                .iter()
                .map(|s| format!("{};\n", s))
                .collect::<String>()
                .into_bytes(),
            _ => {
                return ExecOutput {
                    stderr: b"usage: schema-diff diff|dump URL...".to_vec(),
                    exit_code: 2,
                    ..Default::default()
                };
            }
        };
        ExecOutput {
            stdout,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> MigrateResult<()> {
        let (error, hangs) = {
            let state = self.state();
            (state.ping_error.clone(), state.ping_hangs)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        match error {
            Some(msg) => Err(MigrationError::runtime(msg)),
            None => Ok(()),
        }
    }

    async fn inspect(&self, container: &str) -> MigrateResult<ContainerStatus> {
        Ok(self
            .state()
            .statuses
            .get(container)
            .copied()
            .unwrap_or(ContainerStatus::Running))
    }

    async fn exec(
        &self,
        container: &str,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> MigrateResult<ExecOutput> {
        let action = {
            let mut state = self.state();
            state.execs.push((container.to_string(), argv.to_vec()));
            let program = argv.first().cloned().unwrap_or_default();
            let target = argv.last().cloned().unwrap_or_default();

            if cancel.is_cancelled() {
                Action::Done(Err(MigrationError::Cancelled))
            } else if let Some(stderr) = state.failures.get(&program) {
                Action::Done(Ok(ExecOutput {
                    stderr: stderr.clone().into_bytes(),
                    exit_code: 1,
                    ..Default::default()
                }))
            } else if program == "createdb" || program == "dropdb" {
                if container != self.db_container {
                    Action::Done(Err(MigrationError::runtime(format!(
                        "No such container: {}",
                        container
                    ))))
                } else if program == "createdb" && state.databases.contains_key(&target) {
                    Action::Done(Ok(ExecOutput {
                        stderr: format!(
                            "createdb: error: database creation failed: ERROR:  database \"{}\" already exists",
                            target
                        )
                        .into_bytes(),
                        exit_code: 1,
                        ..Default::default()
                    }))
                } else {
                    if program == "createdb" {
                        state.databases.insert(target, Vec::new());
                    } else {
                        state.databases.remove(&target);
                    }
                    Action::Done(Ok(ExecOutput::default()))
                }
            } else if state.differ_hangs {
                Action::WaitForCancel
            } else {
                let out = match &state.differ_output {
                    Some(out) => out.clone(),
                    None => Self::differ(&state, argv),
                };
                Action::Done(Ok(out))
            }
        };

        match action {
            Action::Done(result) => result,
            Action::WaitForCancel => {
                cancel.cancelled().await;
                Err(MigrationError::Cancelled)
            }
        }
    }
}

#[derive(Default)]
struct ExecutorState {
    attempts: Vec<(String, String)>,
    recorded: Vec<(String, String)>,
    block_label: Option<String>,
}

/// Fake SQL executor that applies scripts into a [`FakeRuntime`].
///
/// Scripts containing `invalid_sql` fail as a whole without touching the
/// database.
pub struct FakeExecutor {
    runtime: Arc<FakeRuntime>,
    state: Mutex<ExecutorState>,
    blocked: Notify,
}

impl FakeExecutor {
    pub fn new(runtime: Arc<FakeRuntime>) -> Self {
        Self {
            runtime,
            state: Mutex::new(ExecutorState::default()),
            blocked: Notify::new(),
        }
    }

    /// Make applying `label` wait until cancelled.
    pub fn block_on(&self, label: &str) {
        self.state.lock().unwrap().block_label = Some(label.to_string());
    }

    /// Resolves once a blocked apply has started.
    pub async fn wait_blocked(&self) {
        self.blocked.notified().await;
    }

    /// Every apply attempt as `(database, label)`.
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Versions recorded in history as `(database, version)`.
    pub fn recorded(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().recorded.clone()
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

        let db = db_name(db_url);
        let blocks = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push((db.clone(), script.label.clone()));
            state.block_label.as_deref() == Some(script.label.as_str())
        };

        if blocks {
            self.blocked.notify_one();
            cancel.cancelled().await;
            return Err(MigrationError::Cancelled);
        }

        if script.body.contains("invalid_sql") {
            return Err(MigrationError::sql_apply(
                &script.label,
                "ERROR:  syntax error at or near \"invalid_sql\"\nLINE 1: invalid_sql\n",
            ));
        }

        self.runtime.apply(&db, &script.body)?;
        if let Some(version) = version {
            self.state
                .lock()
                .unwrap()
                .recorded
                .push((db, version.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for FakeExecutor {
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

/// Fake remote history.
#[derive(Default)]
pub struct FakeHistory {
    versions: Mutex<Vec<String>>,
}

impl FakeHistory {
    pub fn new(versions: &[&str]) -> Self {
        Self {
            versions: Mutex::new(versions.iter().map(|v| v.to_string()).collect()),
        }
    }
}

#[async_trait]
impl HistoryRepository for FakeHistory {
    async fn load_versions(&self) -> MigrateResult<Vec<String>> {
        Ok(self.versions.lock().unwrap().clone())
    }
}

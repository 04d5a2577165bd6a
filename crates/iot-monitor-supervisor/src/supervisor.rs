//! Child process supervision.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use iot_monitor_core::twin::{StatusReporter, job_patch};
use iot_monitor_core::{HubClient, HubEvent, JobId};

use crate::job::{Job, now};
use crate::runtime::{RuntimeCommand, RuntimeError};

/// Spawn error.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("failed to spawn {script}: {source}")]
    Spawn {
        script: String,
        #[source]
        source: std::io::Error,
    },
}

/// Spawns and supervises background jobs.
///
/// Each job runs the configured runtime on a script path with captured
/// stdio. Output, errors and exit status are forwarded to the hub as
/// events; the job's twin slot tracks its running flag and last error.
/// Every side effect is independent and best-effort: a dropped
/// notification is logged and never blocks the next one.
pub struct JobSupervisor<H> {
    hub: Arc<H>,
    reporter: StatusReporter<H>,
    connected: Arc<AtomicBool>,
    runtime: RuntimeCommand,
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl<H: HubClient + 'static> JobSupervisor<H> {
    /// Create a supervisor sharing the agent's connected flag.
    #[must_use]
    pub fn new(hub: Arc<H>, connected: Arc<AtomicBool>, runtime: RuntimeCommand) -> Self {
        let reporter = StatusReporter::new(Arc::clone(&hub), Arc::clone(&connected));
        Self {
            hub,
            reporter,
            connected,
            runtime,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn the configured runtime on `script` and supervise it.
    ///
    /// No dedup and no cap: spawning the same script twice runs two
    /// children.
    ///
    /// # Errors
    /// Returns an error when the runtime cannot be resolved or the child
    /// fails to spawn. Already-emitted notifications are not rolled back,
    /// and nothing is retried.
    pub async fn spawn(&self, script: impl Into<PathBuf>) -> Result<JobId, SpawnError> {
        let script = script.into();
        let script_text = script.display().to_string();

        if self.is_connected() {
            if let Err(e) = self.hub.send_event(HubEvent::job_starting(&script_text)) {
                tracing::warn!(error = %e, script = %script_text, "starting notification dropped");
            }
        } else {
            tracing::error!(script = %script_text, "not connected while spawning job");
        }

        let program = match self.runtime.resolve().await {
            Ok(program) => program,
            Err(e) => {
                self.report_spawn_failure(&script_text, &e.to_string());
                return Err(e.into());
            }
        };

        let mut command = Command::new(program);
        command
            .args(self.runtime.args())
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.report_spawn_failure(&script_text, &source.to_string());
                return Err(SpawnError::Spawn {
                    script: script_text,
                    source,
                });
            }
        };

        let job_id = JobId::new_v4();
        let job = Job {
            id: job_id,
            script: script.clone(),
            pid: child.id(),
            started_at: now(),
        };
        self.jobs.write().unwrap().insert(job_id, job);
        tracing::info!(job = %job_id, script = %script_text, "job spawned");

        self.reporter
            .patch_quietly(job_patch(
                job_id,
                json!({"script": script_text, "running": true, "last_error": null}),
            ))
            .await;

        if let Some(stdout) = child.stdout.take() {
            self.forward_stdout(job_id, &script_text, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.forward_stderr(job_id, &script_text, stderr);
        }
        self.watch_exit(job_id, &script_text, child);

        Ok(job_id)
    }

    /// Snapshot of the live jobs.
    ///
    /// # Panics
    /// Panics if a supervisor task panicked while holding the registry lock.
    #[must_use]
    pub fn running_jobs(&self) -> Vec<Job> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn report_spawn_failure(&self, script: &str, detail: &str) {
        if self.is_connected() {
            if let Err(e) = self.hub.send_event(HubEvent::job_error(None, script, detail)) {
                tracing::warn!(error = %e, "spawn failure notification dropped");
            }
        }
        tracing::error!(script, detail, "failed to spawn job");
    }

    fn forward_stdout(&self, job_id: JobId, script: &str, stdout: impl AsyncRead + Send + Unpin + 'static) {
        let hub = Arc::clone(&self.hub);
        let connected = Arc::clone(&self.connected);
        let script = script.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !connected.load(Ordering::SeqCst) {
                    continue;
                }
                if let Err(e) = hub.send_event(HubEvent::job_output(job_id, &script, line)) {
                    tracing::warn!(error = %e, job = %job_id, "stdout notification dropped");
                }
            }
        });
    }

    fn forward_stderr(&self, job_id: JobId, script: &str, stderr: impl AsyncRead + Send + Unpin + 'static) {
        let hub = Arc::clone(&self.hub);
        let connected = Arc::clone(&self.connected);
        let reporter = self.reporter.clone();
        let script = script.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if connected.load(Ordering::SeqCst) {
                    if let Err(e) =
                        hub.send_event(HubEvent::job_error(Some(job_id), &script, line.clone()))
                    {
                        tracing::warn!(error = %e, job = %job_id, "stderr notification dropped");
                    }
                }
                reporter
                    .patch_quietly(job_patch(job_id, json!({"last_error": line})))
                    .await;
            }
        });
    }

    fn watch_exit(&self, job_id: JobId, script: &str, mut child: tokio::process::Child) {
        let hub = Arc::clone(&self.hub);
        let connected = Arc::clone(&self.connected);
        let reporter = self.reporter.clone();
        let jobs = Arc::clone(&self.jobs);
        let script = script.to_owned();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let code = status.code();
                    if connected.load(Ordering::SeqCst) {
                        if let Err(e) = hub.send_event(HubEvent::job_ended(job_id, &script, code))
                        {
                            tracing::warn!(error = %e, job = %job_id, "exit notification dropped");
                        }
                    }
                    // Exit code only here; stderr forwarding owns last_error.
                    reporter
                        .patch_quietly(job_patch(job_id, json!({"running": false})))
                        .await;
                    tracing::info!(job = %job_id, script = %script, ?code, "job ended");
                }
                Err(e) => {
                    let detail = e.to_string();
                    if connected.load(Ordering::SeqCst) {
                        if let Err(e) =
                            hub.send_event(HubEvent::job_error(Some(job_id), &script, &detail))
                        {
                            tracing::warn!(error = %e, job = %job_id, "wait failure notification dropped");
                        }
                    }
                    reporter
                        .patch_quietly(job_patch(
                            job_id,
                            json!({"running": false, "last_error": detail}),
                        ))
                        .await;
                    tracing::error!(job = %job_id, script = %script, error = %e, "job wait failed");
                }
            }
            jobs.write().unwrap().remove(&job_id);
        });
    }
}

// src/remote/runner.rs

//! Runner backed by a remote execution service.
//!
//! `put` performs the submission round trips (`setup`, `upload_input`,
//! `launch`) before returning, so an unreachable service is reported to the
//! caller as a rejection. Each accepted job then gets its own monitor task
//! polling `status` until the service reports completion, after which the
//! declared outputs are downloaded into the job's working directory and the
//! job is finished locally.
//!
//! The service hands back one file per declared output name. An output
//! declared with a glob pattern is therefore stored as
//! `<working_directory>/<name>`, since the pattern names no single file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, RunnerError};
use crate::exec::outputs::is_pattern;
use crate::exec::{Rejected, Runner, RunnerFuture};
use crate::job::{CollectedOutput, FailureKind, JobSpec, JobWrapper};
use crate::remote::client::{Payload, RemoteClient};
use crate::types::{JobId, JobState, OutputDescriptor};

/// Polling policy for remote jobs.
#[derive(Debug, Clone, Copy)]
pub struct RemoteRunnerOptions {
    pub poll_interval: Duration,
    /// Consecutive failed `status` calls tolerated before the job fails.
    pub max_poll_failures: u32,
}

impl Default for RemoteRunnerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_poll_failures: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetupResponse {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    working_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RemoteStatus {
    Queued,
    Running,
    Complete,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: RemoteStatus,
    #[serde(default)]
    returncode: Option<i32>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

type Monitors = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

pub struct RemoteRunner {
    client: Arc<RemoteClient>,
    options: RemoteRunnerOptions,
    monitors: Monitors,
    shutdown: CancellationToken,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for RemoteRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRunner")
            .field("client", &self.client)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RemoteRunner {
    pub fn new(client: RemoteClient, options: RemoteRunnerOptions) -> Self {
        Self {
            client: Arc::new(client),
            options,
            monitors: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Jobs currently being monitored.
    pub fn pending(&self) -> usize {
        lock(&self.monitors).len()
    }

    /// Submission round trips. Returns the service-side job id.
    ///
    /// Once `setup` has succeeded, a failed upload or launch cleans the
    /// remote staging area before the error is returned.
    async fn submit(&self, job: &JobWrapper) -> Result<String> {
        let spec = job.spec();
        let local_id = spec.id.as_str();

        let setup: SetupResponse = self
            .client
            .execute_json("setup", &[("job_id", local_id)])
            .await?;
        let remote_id = setup.job_id.unwrap_or_else(|| local_id.to_string());
        debug!(
            job = %spec.id,
            remote_id = %remote_id,
            remote_dir = ?setup.working_directory,
            "remote job set up"
        );

        if let Err(e) = self.stage_and_launch(spec, &remote_id).await {
            let args = [("job_id", remote_id.as_str())];
            if let Err(clean_err) = self.client.execute("clean", &args, Payload::Empty, None).await {
                debug!(job = %spec.id, error = %clean_err, "cleaning rejected remote job failed");
            }
            return Err(e);
        }

        Ok(remote_id)
    }

    async fn stage_and_launch(&self, spec: &JobSpec, remote_id: &str) -> Result<()> {
        for input in &spec.inputs {
            let path = if input.is_absolute() {
                input.clone()
            } else {
                spec.working_directory.join(input)
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    RunnerError::Submission(format!("input {:?} has no file name", input))
                })?;
            self.client
                .execute(
                    "upload_input",
                    &[("job_id", remote_id), ("name", name.as_str())],
                    Payload::File(path),
                    None,
                )
                .await?;
        }

        self.client
            .execute(
                "launch",
                &[
                    ("job_id", remote_id),
                    ("command_line", spec.command_line.as_str()),
                ],
                Payload::Empty,
                None,
            )
            .await?;
        Ok(())
    }
}

impl Runner for RemoteRunner {
    fn name(&self) -> &str {
        "remote"
    }

    fn put(&self, mut job: JobWrapper) -> RunnerFuture<'_, std::result::Result<(), Rejected>> {
        Box::pin(async move {
            if self.shut_down.load(Ordering::SeqCst) {
                let err = RunnerError::Submission("remote runner is shut down".to_string());
                return Err(Rejected::new(job, err));
            }

            if let Err(e) = job.mark_queued() {
                return Err(Rejected::new(job, e));
            }

            let remote_id = match self.submit(&job).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(job = %job.id(), error = %e, "remote submission failed");
                    let err = RunnerError::Submission(e.to_string());
                    return Err(Rejected::new(job, err));
                }
            };

            let id = job.id().clone();
            lock(&self.monitors).insert(id.clone(), job.cancel_token());
            info!(job = %id, remote_id = %remote_id, "job submitted to remote service");

            let monitor = Monitor {
                client: Arc::clone(&self.client),
                options: self.options,
                remote_id,
                shutdown: self.shutdown.clone(),
            };
            let monitors = Arc::clone(&self.monitors);
            tokio::spawn(async move {
                monitor.run(job).await;
                lock(&monitors).remove(&id);
            });
            Ok(())
        })
    }

    fn stop(&self, job: JobId) -> RunnerFuture<'_, ()> {
        Box::pin(async move {
            match lock(&self.monitors).get(&job) {
                Some(token) => {
                    info!(job = %job, "stop requested for remote job");
                    token.cancel();
                }
                None => debug!(job = %job, "stop requested for job not active on this runner"),
            }
        })
    }

    fn shutdown(&self) -> RunnerFuture<'_, ()> {
        Box::pin(async move {
            if self.shut_down.swap(true, Ordering::SeqCst) {
                debug!("remote runner already shut down");
                return;
            }
            info!(monitors = self.pending(), "shutting down remote runner");
            self.shutdown.cancel();
        })
    }
}

/// Everything a monitor task needs, detached from the runner.
struct Monitor {
    client: Arc<RemoteClient>,
    options: RemoteRunnerOptions,
    remote_id: String,
    shutdown: CancellationToken,
}

impl Monitor {
    async fn run(self, mut job: JobWrapper) {
        let stop = job.cancel_token();
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    self.kill(&job).await;
                    if let Err(e) = job.mark_deleted() {
                        warn!(job = %job.id(), error = %e, "could not mark stopped job deleted");
                    }
                    return;
                }
                _ = self.shutdown.cancelled() => {
                    info!(job = %job.id(), state = %job.state(), "runner shut down; no longer monitoring job");
                    return;
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }

            let status: StatusResponse = match self
                .client
                .execute_json("status", &[("job_id", self.remote_id.as_str())])
                .await
            {
                Ok(status) => {
                    failures = 0;
                    status
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        job = %job.id(),
                        failures,
                        max = self.options.max_poll_failures,
                        error = %e,
                        "polling remote job failed"
                    );
                    if failures > self.options.max_poll_failures {
                        if let Err(e) = job.fail(
                            FailureKind::Transport,
                            format!("lost contact with remote service: {e}"),
                            true,
                        ) {
                            warn!(job = %job.id(), error = %e, "could not record transport failure");
                        }
                        return;
                    }
                    continue;
                }
            };

            debug!(job = %job.id(), status = ?status.status, "remote job status");

            if status.status != RemoteStatus::Queued && job.state() != JobState::Running {
                if let Err(e) = job.mark_running() {
                    warn!(job = %job.id(), error = %e, "could not mark remote job running");
                    return;
                }
            }

            if status.status == RemoteStatus::Complete {
                self.complete(&mut job, status).await;
                self.clean(&job).await;
                return;
            }
        }
    }

    async fn complete(&self, job: &mut JobWrapper, status: StatusResponse) {
        let stdout = status.stdout.unwrap_or_default();
        let stderr = status.stderr.unwrap_or_default();

        let outputs = match self.download_outputs(job).await {
            Ok(outputs) => outputs,
            Err(e) => {
                let result = job.fail_with_output(
                    FailureKind::Transport,
                    format!("fetching outputs: {e}"),
                    stdout,
                    stderr,
                    status.returncode,
                    true,
                );
                if let Err(e) = result {
                    warn!(job = %job.id(), error = %e, "could not record output fetch failure");
                }
                return;
            }
        };
        job.register_outputs(outputs);

        let result = match status.returncode {
            Some(code) => job.finish(stdout, stderr, code).map(|_| ()),
            None => job.fail_with_output(
                FailureKind::Execution,
                "remote service reported completion without a return code",
                stdout,
                stderr,
                None,
                false,
            ),
        };
        if let Err(e) = result {
            warn!(job = %job.id(), error = %e, "could not record remote job completion");
        }
    }

    async fn download_outputs(&self, job: &JobWrapper) -> Result<Vec<CollectedOutput>> {
        let spec = job.spec();
        let mut collected = Vec::with_capacity(spec.outputs.len());
        for output in &spec.outputs {
            let target = download_target(&spec.working_directory, output);
            self.client
                .execute(
                    "download_output",
                    &[
                        ("job_id", self.remote_id.as_str()),
                        ("name", output.name.as_str()),
                    ],
                    Payload::Empty,
                    Some(&target),
                )
                .await?;
            debug!(job = %spec.id, output = %output.name, path = %target.display(), "collected remote output");
            collected.push(CollectedOutput {
                name: output.name.clone(),
                path: target,
            });
        }
        Ok(collected)
    }

    async fn kill(&self, job: &JobWrapper) {
        let args = [("job_id", self.remote_id.as_str())];
        if let Err(e) = self.client.execute("kill", &args, Payload::Empty, None).await {
            warn!(job = %job.id(), error = %e, "remote kill failed");
        }
    }

    async fn clean(&self, job: &JobWrapper) {
        let args = [("job_id", self.remote_id.as_str())];
        if let Err(e) = self.client.execute("clean", &args, Payload::Empty, None).await {
            debug!(job = %job.id(), error = %e, "remote clean failed");
        }
    }
}

/// Local path a downloaded output is written to.
fn download_target(working_directory: &Path, output: &OutputDescriptor) -> PathBuf {
    if is_pattern(&output.path) {
        working_directory.join(&output.name)
    } else if output.path.is_absolute() {
        output.path.clone()
    } else {
        working_directory.join(&output.path)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

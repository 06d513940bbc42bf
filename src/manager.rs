// src/manager.rs

//! Composition root for execution backends.
//!
//! The manager owns one [`Runner`] per destination, routes each submitted job
//! to its destination's runner, walks the destination's fallback chain when a
//! runner rejects the job, and remembers which runner accepted which job so
//! `stop` reaches the right one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::{ConfigFile, RunnerKind};
use crate::errors::{Result, RunnerError};
use crate::exec::{LocalRunner, Rejected, Runner};
use crate::job::{FailureKind, JobSpec, JobWrapper};
use crate::remote::{RemoteClient, RemoteRunner};
use crate::store::JobSink;
use crate::types::JobId;

pub struct JobManager {
    runners: BTreeMap<String, Arc<dyn Runner>>,
    default_destination: Option<String>,
    fallbacks: HashMap<String, String>,
    sink: Arc<dyn JobSink>,
    /// Every job id ever submitted, accepted or not.
    submitted: Mutex<HashSet<JobId>>,
    /// Destination whose runner accepted each job. Kept after the job ends,
    /// like `submitted`, so it grows with every accepted job for the life of
    /// the manager.
    assignments: Mutex<HashMap<JobId, String>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("destinations", &self.runners.keys().collect::<Vec<_>>())
            .field("default_destination", &self.default_destination)
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

impl JobManager {
    pub fn new(sink: Arc<dyn JobSink>) -> Self {
        Self {
            runners: BTreeMap::new(),
            default_destination: None,
            fallbacks: HashMap::new(),
            sink,
            submitted: Mutex::new(HashSet::new()),
            assignments: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Build every configured destination's runner.
    ///
    /// Local runners spawn their workers here, so this must run inside a
    /// Tokio runtime.
    pub fn from_config(cfg: &ConfigFile, sink: Arc<dyn JobSink>) -> Result<Self> {
        let mut manager = Self::new(sink);

        for (name, dest) in cfg.destination.iter() {
            let runner: Arc<dyn Runner> = match dest.runner {
                RunnerKind::Local => Arc::new(LocalRunner::new(dest.workers)?),
                RunnerKind::Remote => {
                    let client = RemoteClient::new(&dest.remote_config())?;
                    Arc::new(RemoteRunner::new(client, dest.remote_options()))
                }
            };
            info!(destination = %name, runner = runner.name(), "destination configured");
            manager.register(name.clone(), runner);

            if let Some(fallback) = &dest.fallback {
                manager.set_fallback(name.clone(), fallback.clone());
            }
        }

        if let Some(default) = cfg.default_destination() {
            manager = manager.with_default_destination(default);
        }
        Ok(manager)
    }

    pub fn register(&mut self, destination: impl Into<String>, runner: Arc<dyn Runner>) {
        let destination = destination.into();
        if self.runners.insert(destination.clone(), runner).is_some() {
            warn!(destination = %destination, "runner replaced for destination");
        }
    }

    pub fn with_default_destination(mut self, destination: impl Into<String>) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    /// Jobs rejected by `destination` are retried on `fallback`.
    pub fn set_fallback(&mut self, destination: impl Into<String>, fallback: impl Into<String>) {
        self.fallbacks.insert(destination.into(), fallback.into());
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }

    pub fn default_destination(&self) -> Option<&str> {
        self.default_destination.as_deref()
    }

    pub fn runner(&self, destination: &str) -> Option<&Arc<dyn Runner>> {
        self.runners.get(destination)
    }

    /// Destination whose runner accepted `job`, if any did. Still answers
    /// once the job has reached a terminal state.
    pub fn assignment(&self, job: &JobId) -> Option<String> {
        lock(&self.assignments).get(job).cloned()
    }

    /// Wrap `spec` in a handle reporting to the manager's sink and submit it.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        let id = spec.id.clone();
        self.claim(&id)?;
        let job = JobWrapper::new(spec, Arc::clone(&self.sink));
        self.dispatch(job).await?;
        Ok(id)
    }

    /// Submit an existing job handle.
    ///
    /// A job id is dispatched at most once over the manager's lifetime.
    /// When no runner accepts the job, it is failed here with a
    /// `Submission` failure and the error is returned.
    pub async fn put(&self, job: JobWrapper) -> Result<()> {
        self.claim(job.id())?;
        self.dispatch(job).await
    }

    /// Best-effort stop, routed to the runner that accepted the job.
    pub async fn stop(&self, job: &JobId) {
        let destination = lock(&self.assignments).get(job).cloned();
        let Some(destination) = destination else {
            debug!(job = %job, "stop requested for unknown job; ignoring");
            return;
        };
        match self.runners.get(&destination) {
            Some(runner) => {
                info!(job = %job, destination = %destination, "stopping job");
                runner.stop(job.clone()).await;
            }
            None => debug!(job = %job, destination = %destination, "no runner for assigned destination"),
        }
    }

    /// Shut down every runner. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("job manager already shut down");
            return;
        }
        info!(runners = self.runners.len(), "shutting down job manager");
        for (destination, runner) in self.runners.iter() {
            debug!(destination = %destination, "shutting down runner");
            runner.shutdown().await;
        }
    }

    fn claim(&self, id: &JobId) -> Result<()> {
        if !lock(&self.submitted).insert(id.clone()) {
            warn!(job = %id, "duplicate job id rejected");
            return Err(RunnerError::DuplicateJob(id.clone()));
        }
        Ok(())
    }

    async fn dispatch(&self, mut job: JobWrapper) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            let reason = "job manager is shut down".to_string();
            record_failure(&mut job, &reason);
            return Err(RunnerError::Submission(reason));
        }

        let requested = if job.destination().is_empty() {
            self.default_destination.clone()
        } else {
            Some(job.destination().to_string())
        };
        let Some(mut destination) = requested else {
            record_failure(&mut job, "no destination given and no default destination configured");
            return Err(RunnerError::UnknownDestination(String::new()));
        };

        let mut tried: Vec<String> = Vec::new();
        loop {
            let Some(runner) = self.runners.get(&destination) else {
                record_failure(&mut job, &format!("unknown destination '{destination}'"));
                return Err(RunnerError::UnknownDestination(destination));
            };

            let id = job.id().clone();
            // Record the assignment first: a fast runner may finish the job
            // before `put` returns, and `stop` must still find it.
            lock(&self.assignments).insert(id.clone(), destination.clone());

            match runner.put(job).await {
                Ok(()) => {
                    info!(job = %id, destination = %destination, runner = runner.name(), "job dispatched");
                    return Ok(());
                }
                Err(Rejected { job: returned, error }) => {
                    lock(&self.assignments).remove(&id);
                    job = returned;
                    warn!(job = %id, destination = %destination, error = %error, "destination rejected job");

                    tried.push(destination.clone());
                    match self.fallbacks.get(&destination) {
                        Some(next) if !tried.contains(next) => {
                            info!(job = %id, from = %destination, to = %next, "trying fallback destination");
                            destination = next.clone();
                        }
                        _ => {
                            let reason = format!(
                                "no destination accepted the job (tried {}): {error}",
                                tried.join(", ")
                            );
                            record_failure(&mut job, &reason);
                            return Err(RunnerError::Submission(reason));
                        }
                    }
                }
            }
        }
    }
}

fn record_failure(job: &mut JobWrapper, reason: &str) {
    if let Err(e) = job.fail(FailureKind::Submission, reason, false) {
        warn!(job = %job.id(), error = %e, "could not record submission failure");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

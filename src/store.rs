// src/store.rs

//! Boundary towards the persistence layer.
//!
//! The runner core never owns persistence. Everything it reports about a job
//! goes through a [`JobSink`]: every accepted state transition, and the
//! captured results once the job reaches a terminal state.
//!
//! [`MemoryJobStore`] is an in-memory sink. The binary uses it to wait for
//! and summarise jobs; tests use its per-job state history.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::job::JobResults;
use crate::types::{JobId, JobState};

/// Receiver of job state changes and results.
pub trait JobSink: Send + Sync {
    /// Called with `new` when a job handle is created, then once per
    /// accepted transition.
    fn state_changed(&self, job: &JobId, state: JobState);

    /// Called exactly once per job, when results are recorded.
    fn job_finished(&self, job: &JobId, results: &JobResults);
}

/// Everything the store knows about one job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub state: JobState,
    pub history: Vec<JobState>,
    pub results: Option<JobResults>,
}

impl JobRecord {
    fn new(state: JobState) -> Self {
        Self {
            state,
            history: vec![state],
            results: None,
        }
    }
}

#[derive(Debug)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            records: Mutex::new(HashMap::new()),
            changes,
        }
    }

    pub fn record(&self, job: &JobId) -> Option<JobRecord> {
        self.lock().get(job).cloned()
    }

    pub fn state(&self, job: &JobId) -> Option<JobState> {
        self.lock().get(job).map(|r| r.state)
    }

    /// All states the job has been observed in, oldest first.
    pub fn history(&self, job: &JobId) -> Vec<JobState> {
        self.lock()
            .get(job)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    pub fn results(&self, job: &JobId) -> Option<JobResults> {
        self.lock().get(job).and_then(|r| r.results.clone())
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until the job is in a terminal state and return its record.
    ///
    /// Returns `None` if the timeout elapses first.
    pub async fn wait_for_terminal(&self, job: &JobId, timeout: Duration) -> Option<JobRecord> {
        let mut rx = self.changes.subscribe();
        let wait = async {
            loop {
                if let Some(record) = self.record(job) {
                    if record.state.is_terminal() {
                        return record;
                    }
                }
                if rx.changed().await.is_err() {
                    // Sender lives as long as `self`; this cannot happen while we borrow it.
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Wait for a specific state (e.g. `running`), for tests and diagnostics.
    pub async fn wait_for_state(
        &self,
        job: &JobId,
        state: JobState,
        timeout: Duration,
    ) -> bool {
        let mut rx = self.changes.subscribe();
        let wait = async {
            loop {
                if self.history(job).contains(&state) {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JobRecord>> {
        // A poisoned map is still consistent: every write is a single insert/push.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n += 1);
    }
}

impl JobSink for MemoryJobStore {
    fn state_changed(&self, job: &JobId, state: JobState) {
        {
            let mut records = self.lock();
            records
                .entry(job.clone())
                .and_modify(|r| {
                    r.state = state;
                    r.history.push(state);
                })
                .or_insert_with(|| JobRecord::new(state));
        }
        debug!(job = %job, %state, "job state recorded");
        self.notify();
    }

    fn job_finished(&self, job: &JobId, results: &JobResults) {
        {
            let mut records = self.lock();
            let record = records
                .entry(job.clone())
                .or_insert_with(|| JobRecord::new(JobState::New));
            record.results = Some(results.clone());
        }
        self.notify();
    }
}

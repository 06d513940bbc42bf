// src/exec/local.rs

//! Local worker-pool runner.
//!
//! `nworkers` worker tasks share one unbounded FIFO queue. A worker holds the
//! queue lock only while waiting for the next item, then runs that job to
//! completion before pulling again, so:
//!
//! - at most `nworkers` jobs execute at once, however long the queue gets;
//! - jobs *start* in submission order (completion order is not guaranteed).
//!
//! `shutdown` pushes one sentinel per worker behind whatever is already
//! queued; workers drain the queue and exit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::{Result, RunnerError};
use crate::exec::backend::{Rejected, Runner, RunnerFuture};
use crate::exec::task_runner::run_job;
use crate::fs::{FileSystem, RealFileSystem};
use crate::job::JobWrapper;
use crate::types::JobId;

enum QueueItem {
    Job(JobWrapper),
    /// Tells exactly one worker to exit.
    Shutdown,
}

type ActiveJobs = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

pub struct LocalRunner {
    nworkers: usize,
    tx: mpsc::UnboundedSender<QueueItem>,
    /// Jobs accepted and not yet finished, with their stop signal.
    active: ActiveJobs,
    /// Set once by `shutdown`. Held across the check and the send in `put`
    /// so no job can be queued behind the shutdown sentinels.
    shut_down: Mutex<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("nworkers", &self.nworkers)
            .field("shut_down", &*lock(&self.shut_down))
            .finish_non_exhaustive()
    }
}

impl LocalRunner {
    /// Create the pool and spawn its workers immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(nworkers: usize) -> Result<Self> {
        Self::with_fs(nworkers, Arc::new(RealFileSystem))
    }

    pub fn with_fs(nworkers: usize, fs: Arc<dyn FileSystem>) -> Result<Self> {
        if nworkers == 0 {
            return Err(RunnerError::Config(
                "local runner needs at least one worker (got 0)".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel::<QueueItem>();
        let rx = Arc::new(AsyncMutex::new(rx));
        let active: ActiveJobs = Arc::new(Mutex::new(HashMap::new()));

        let workers = (0..nworkers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let active = Arc::clone(&active);
                let fs = Arc::clone(&fs);
                tokio::spawn(worker_loop(worker, rx, active, fs))
            })
            .collect();

        info!(nworkers, "local runner started");

        Ok(Self {
            nworkers,
            tx,
            active,
            shut_down: Mutex::new(false),
            workers: Mutex::new(workers),
        })
    }

    pub fn nworkers(&self) -> usize {
        self.nworkers
    }

    /// Number of accepted jobs that have not reached a terminal state.
    pub fn pending(&self) -> usize {
        lock(&self.active).len()
    }

    /// Wait for every worker to exit. Only returns after `shutdown`.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "local worker ended abnormally");
            }
        }
    }
}

impl Runner for LocalRunner {
    fn name(&self) -> &str {
        "local"
    }

    fn put(&self, mut job: JobWrapper) -> RunnerFuture<'_, std::result::Result<(), Rejected>> {
        Box::pin(async move {
            let shut_down = lock(&self.shut_down);
            if *shut_down {
                let err = RunnerError::Submission("local runner is shut down".to_string());
                return Err(Rejected::new(job, err));
            }

            if let Err(e) = job.mark_queued() {
                return Err(Rejected::new(job, e));
            }

            let id = job.id().clone();
            lock(&self.active).insert(id.clone(), job.cancel_token());

            if let Err(mpsc::error::SendError(QueueItem::Job(job))) =
                self.tx.send(QueueItem::Job(job))
            {
                lock(&self.active).remove(&id);
                let err = RunnerError::Submission("local job queue is closed".to_string());
                return Err(Rejected::new(job, err));
            }
            drop(shut_down);

            debug!(job = %id, "job queued on local runner");
            Ok(())
        })
    }

    fn stop(&self, job: JobId) -> RunnerFuture<'_, ()> {
        Box::pin(async move {
            match lock(&self.active).get(&job) {
                Some(token) => {
                    info!(job = %job, "stop requested");
                    token.cancel();
                }
                None => {
                    debug!(job = %job, "stop requested for job not active on this runner");
                }
            }
        })
    }

    fn shutdown(&self) -> RunnerFuture<'_, ()> {
        Box::pin(async move {
            let mut shut_down = lock(&self.shut_down);
            if *shut_down {
                debug!("local runner already shut down");
                return;
            }
            *shut_down = true;
            info!(nworkers = self.nworkers, "shutting down local runner");
            for _ in 0..self.nworkers {
                // Fails only if every worker is already gone.
                let _ = self.tx.send(QueueItem::Shutdown);
            }
        })
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueueItem>>>,
    active: ActiveJobs,
    fs: Arc<dyn FileSystem>,
) {
    debug!(worker, "local worker started");

    loop {
        let item = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let job = match item {
            Some(QueueItem::Job(job)) => job,
            Some(QueueItem::Shutdown) | None => break,
        };

        let id = job.id().clone();
        let fs = Arc::clone(&fs);

        // Run the job body in its own task so a panic is contained to this
        // job and the worker keeps serving the queue.
        let body = tokio::spawn(async move {
            let job = run_job(job, fs.as_ref(), worker).await;
            debug!(job = %job.id(), worker, state = %job.state(), "job released by worker");
        });
        if let Err(e) = body.await {
            error!(job = %id, worker, error = %e, "job execution panicked");
        }

        lock(&active).remove(&id);
    }

    debug!(worker, "local worker exiting");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

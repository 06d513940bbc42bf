// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The [`JobManager`](crate::manager::JobManager) talks to a `Runner`
//! instead of a concrete backend, so a local worker pool, a remote
//! execution service and test fakes are interchangeable per destination.
//!
//! - [`LocalRunner`](super::LocalRunner) runs jobs as child processes on a
//!   fixed pool of workers.
//! - [`RemoteRunner`](crate::remote::RemoteRunner) submits jobs to an
//!   out-of-process execution service and polls them to completion.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::errors::RunnerError;
use crate::job::JobWrapper;
use crate::types::JobId;

/// Boxed future returned by [`Runner`] methods.
pub type RunnerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A job the runner could not accept, handed back to the caller together
/// with the reason so it can be retried elsewhere or failed.
#[derive(Error, Debug)]
#[error("job {} rejected: {}", .job.id(), .error)]
pub struct Rejected {
    pub job: JobWrapper,
    pub error: RunnerError,
}

impl Rejected {
    pub fn new(job: JobWrapper, error: RunnerError) -> Self {
        Self { job, error }
    }
}

/// Capability set every execution backend exposes.
pub trait Runner: Send + Sync {
    /// Short backend name for logs (`local`, `remote`, ...).
    fn name(&self) -> &str;

    /// Accept a job for asynchronous execution.
    ///
    /// The job must be `queued` by the time this resolves successfully;
    /// execution happens out of band. On failure the job is returned in
    /// [`Rejected`].
    fn put(&self, job: JobWrapper) -> RunnerFuture<'_, Result<(), Rejected>>;

    /// Best-effort cancellation of a queued or running job. Never fails;
    /// a job that already produced its result may still finish normally.
    fn stop(&self, job: JobId) -> RunnerFuture<'_, ()>;

    /// Release workers and connections. Idempotent.
    fn shutdown(&self) -> RunnerFuture<'_, ()>;
}

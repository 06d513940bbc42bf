use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use jobrunner::errors::RunnerError;
use jobrunner::exec::{Rejected, Runner, RunnerFuture};
use jobrunner::job::JobWrapper;
use jobrunner::types::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    /// Queue the job and hold it until stopped.
    Hold,
    /// Queue, run and finish the job with exit code 0 inside `put`.
    Complete,
    /// Hand every job back in `Rejected`.
    Reject,
}

/// A fake runner that:
/// - records which jobs it accepted, was asked to stop, and shutdown calls
/// - either holds, completes or rejects every job it is given.
pub struct RecordingRunner {
    name: String,
    behaviour: Behaviour,
    accepted: Arc<Mutex<Vec<JobId>>>,
    stopped: Arc<Mutex<Vec<JobId>>>,
    held: Mutex<HashMap<JobId, JobWrapper>>,
    shutdowns: AtomicUsize,
}

impl RecordingRunner {
    fn with_behaviour(name: &str, behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            accepted: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
            held: Mutex::new(HashMap::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn holding(name: &str) -> Self {
        Self::with_behaviour(name, Behaviour::Hold)
    }

    pub fn completing(name: &str) -> Self {
        Self::with_behaviour(name, Behaviour::Complete)
    }

    pub fn rejecting(name: &str) -> Self {
        Self::with_behaviour(name, Behaviour::Reject)
    }

    pub fn accepted(&self) -> Vec<JobId> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<JobId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Runner for RecordingRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, mut job: JobWrapper) -> RunnerFuture<'_, Result<(), Rejected>> {
        Box::pin(async move {
            if self.behaviour == Behaviour::Reject {
                let err = RunnerError::Submission(format!("{} refuses all jobs", self.name));
                return Err(Rejected::new(job, err));
            }

            if let Err(e) = job.mark_queued() {
                return Err(Rejected::new(job, e));
            }
            let id = job.id().clone();
            self.accepted.lock().unwrap().push(id.clone());

            if self.behaviour == Behaviour::Complete {
                job.mark_running().expect("queued job can start");
                job.finish(String::new(), String::new(), 0)
                    .expect("running job can finish");
            } else {
                self.held.lock().unwrap().insert(id, job);
            }
            Ok(())
        })
    }

    fn stop(&self, job: JobId) -> RunnerFuture<'_, ()> {
        Box::pin(async move {
            self.stopped.lock().unwrap().push(job.clone());
            if let Some(mut held) = self.held.lock().unwrap().remove(&job) {
                held.mark_deleted().expect("held job can be deleted");
            }
        })
    }

    fn shutdown(&self) -> RunnerFuture<'_, ()> {
        Box::pin(async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        })
    }
}

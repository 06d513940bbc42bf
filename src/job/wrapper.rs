// src/job/wrapper.rs

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, RunnerError};
use crate::job::detectors::{scan_all, DetectorLevel};
use crate::job::{CollectedOutput, FailureKind, JobFailure, JobResults, JobSpec};
use crate::store::JobSink;
use crate::types::{JobId, JobState};

/// Per-job handle.
///
/// The handle is owned by exactly one party at a time (submitter, runner
/// queue, worker), so its fields need no locking. The only shared piece is
/// the cancellation token, which `stop` uses to signal whoever currently
/// owns the job.
pub struct JobWrapper {
    spec: JobSpec,
    state: JobState,
    results: Option<JobResults>,
    outputs: Vec<CollectedOutput>,
    cancel: CancellationToken,
    sink: Arc<dyn JobSink>,
}

impl fmt::Debug for JobWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobWrapper")
            .field("id", &self.spec.id)
            .field("state", &self.state)
            .field("command_line", &self.spec.command_line)
            .field("destination", &self.spec.destination)
            .finish_non_exhaustive()
    }
}

impl JobWrapper {
    pub fn new(spec: JobSpec, sink: Arc<dyn JobSink>) -> Self {
        sink.state_changed(&spec.id, JobState::New);
        Self {
            spec,
            state: JobState::New,
            results: None,
            outputs: Vec::new(),
            cancel: CancellationToken::new(),
            sink,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.spec.id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn results(&self) -> Option<&JobResults> {
        self.results.as_ref()
    }

    pub fn destination(&self) -> &str {
        &self.spec.destination
    }

    /// Token shared with the runner so `stop` can reach the current owner.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `new -> queued`.
    ///
    /// A job that is already `queued` is accepted unchanged: that is a job a
    /// runner rejected being handed to a fallback destination.
    pub fn mark_queued(&mut self) -> Result<()> {
        if self.state == JobState::Queued {
            debug!(job = %self.spec.id, "job already queued; re-queued on another runner");
            return Ok(());
        }
        self.transition(JobState::Queued)
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(JobState::Running)
    }

    /// Cancellation: `queued|running -> deleted`.
    pub fn mark_deleted(&mut self) -> Result<()> {
        self.ensure_transition(JobState::Deleted)?;
        let results = self.results_with(
            String::new(),
            String::new(),
            None,
            Some(JobFailure {
                kind: FailureKind::Cancelled,
                reason: "job stopped".to_string(),
            }),
        );
        info!(job = %self.spec.id, from = %self.state, "job deleted");
        self.record(JobState::Deleted, results)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(JobState::Paused)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(JobState::Queued)
    }

    /// Attach outputs found in the working directory; they are included in
    /// the results recorded by `finish`.
    pub fn register_outputs(&mut self, outputs: Vec<CollectedOutput>) {
        self.outputs = outputs;
    }

    /// Record a completed process and decide `ok` vs `error`.
    ///
    /// A non-zero exit code or a fatal stdio detector match is an error.
    pub fn finish(&mut self, stdout: String, stderr: String, exit_code: i32) -> Result<JobState> {
        let matches = scan_all(&self.spec.detectors, &stdout, &stderr);
        for m in matches.iter().filter(|m| m.level == DetectorLevel::Warning) {
            warn!(
                job = %self.spec.id,
                stream = ?m.stream,
                line = %m.line,
                "stdio warning detected"
            );
        }

        let failure = if exit_code != 0 {
            Some(JobFailure {
                kind: FailureKind::Execution,
                reason: format!("process exited with code {exit_code}"),
            })
        } else {
            matches
                .iter()
                .find(|m| m.level == DetectorLevel::Fatal)
                .map(|m| JobFailure {
                    kind: FailureKind::Execution,
                    reason: match &m.description {
                        Some(desc) => format!("{desc}: {}", m.line),
                        None => format!("stdio error detected: {}", m.line),
                    },
                })
        };

        let next = if failure.is_some() {
            JobState::Error
        } else {
            JobState::Ok
        };
        self.ensure_transition(next)?;

        info!(
            job = %self.spec.id,
            exit_code,
            state = %next,
            "job finished"
        );
        let results = self.results_with(stdout, stderr, Some(exit_code), failure);
        self.record(next, results)?;
        Ok(next)
    }

    /// Record a failure where no (usable) process result exists.
    ///
    /// `exception` marks failures caused by an unexpected error rather than
    /// an ordinary rejection; those are logged at error level.
    pub fn fail(&mut self, kind: FailureKind, reason: impl Into<String>, exception: bool) -> Result<()> {
        let reason = reason.into();
        self.fail_with_output(kind, reason.clone(), String::new(), reason, None, exception)
    }

    /// Like [`fail`](Self::fail) but keeps whatever the process produced.
    pub fn fail_with_output(
        &mut self,
        kind: FailureKind,
        reason: impl Into<String>,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        exception: bool,
    ) -> Result<()> {
        let reason = reason.into();
        self.ensure_transition(JobState::Error)?;
        if exception {
            error!(job = %self.spec.id, %kind, %reason, "job failed");
        } else {
            warn!(job = %self.spec.id, %kind, %reason, "job failed");
        }
        let results = self.results_with(stdout, stderr, exit_code, Some(JobFailure { kind, reason }));
        self.record(JobState::Error, results)
    }

    fn results_with(
        &mut self,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        failure: Option<JobFailure>,
    ) -> JobResults {
        JobResults {
            stdout,
            stderr,
            exit_code,
            failure,
            outputs: std::mem::take(&mut self.outputs),
        }
    }

    fn ensure_transition(&self, next: JobState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(RunnerError::InvalidTransition {
                job: self.spec.id.clone(),
                from: self.state,
                to: next,
            })
        }
    }

    fn transition(&mut self, next: JobState) -> Result<()> {
        self.ensure_transition(next)?;
        debug!(job = %self.spec.id, from = %self.state, to = %next, "job state transition");
        self.state = next;
        self.sink.state_changed(&self.spec.id, next);
        Ok(())
    }

    /// Terminal transition carrying results. Results go to the sink before
    /// the state so observers of the terminal state always see them.
    fn record(&mut self, next: JobState, results: JobResults) -> Result<()> {
        if self.results.is_some() {
            return Err(RunnerError::ResultsAlreadyRecorded(self.spec.id.clone()));
        }
        self.sink.job_finished(&self.spec.id, &results);
        self.results = Some(results);
        self.transition(next)
    }
}

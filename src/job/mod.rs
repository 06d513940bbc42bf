// src/job/mod.rs

//! Job submissions, the per-job handle, and captured results.
//!
//! - [`JobSpec`] is what the tool layer hands in: command line, working
//!   directory, declared inputs/outputs, destination and error detectors.
//! - [`JobWrapper`] is the mutable handle that moves from the submitter to a
//!   runner's queue to the one worker executing it. It enforces the state
//!   machine in [`JobState`](crate::types::JobState) and reports every change
//!   to a [`JobSink`](crate::store::JobSink).
//! - [`JobResults`] are written once, at the terminal transition.

pub mod detectors;
pub mod wrapper;

use std::fmt;
use std::path::PathBuf;

use crate::types::{JobId, OutputDescriptor};

pub use detectors::{DetectorLevel, DetectorMatch, ErrorDetector, StdioStream};
pub use wrapper::JobWrapper;

/// A fully prepared job submission.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub command_line: String,
    pub working_directory: PathBuf,
    /// Files staged to a remote service before launch. Relative paths are
    /// resolved against `working_directory`. Local runs do not stage
    /// inputs; relative file arguments in `command_line` are resolved
    /// against the runner's own current directory instead.
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<OutputDescriptor>,
    /// Destination key; empty means "the manager's default".
    pub destination: String,
    pub detectors: Vec<ErrorDetector>,
}

impl JobSpec {
    pub fn new(
        id: impl Into<JobId>,
        command_line: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            command_line: command_line.into(),
            working_directory: working_directory.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            destination: String::new(),
            detectors: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn with_output(mut self, output: OutputDescriptor) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_detector(mut self, detector: ErrorDetector) -> Self {
        self.detectors.push(detector);
        self
    }
}

/// Why a job ended in `error` (or `deleted`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Working directory or command line could not be prepared.
    Preparation,
    /// The process could not be started.
    Launch,
    /// The process ran but exited non-zero or tripped an error detector.
    Execution,
    /// No runner accepted the job.
    Submission,
    /// A remote round trip failed after submission.
    Transport,
    /// The job was stopped.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Preparation => "preparation",
            FailureKind::Launch => "launch",
            FailureKind::Execution => "execution",
            FailureKind::Submission => "submission",
            FailureKind::Transport => "transport",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// A declared output that was found after the job ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    pub name: String,
    pub path: PathBuf,
}

/// Captured results of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResults {
    pub stdout: String,
    pub stderr: String,
    /// `None` when no process ever ran (or it was killed by a signal).
    pub exit_code: Option<i32>,
    pub failure: Option<JobFailure>,
    pub outputs: Vec<CollectedOutput>,
}

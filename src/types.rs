// src/types.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable job identifier, unique for the lifetime of the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// new -> queued -> running -> ok | error | deleted
///   \       \
///    +-------+--> paused -> queued
/// ```
///
/// `queued` and `running` can also go straight to `deleted` (cancellation),
/// and `new`/`queued` can go to `error` when submission itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Queued,
    Running,
    Ok,
    Error,
    Deleted,
    Paused,
}

impl JobState {
    /// `ok`, `error` and `deleted` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Ok | JobState::Error | JobState::Deleted)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (New, Queued) => true,
            (New | Queued, Paused) => true,
            (Paused, Queued | Deleted) => true,
            (Queued, Running) => true,
            (Running, Ok | Error) => true,
            (Queued | Running, Deleted) => true,
            // Submission failures are recorded before a worker ever sees the job.
            (New | Queued, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::New => "new",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Ok => "ok",
            JobState::Error => "error",
            JobState::Deleted => "deleted",
            JobState::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(JobState::New),
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "ok" => Ok(JobState::Ok),
            "error" => Ok(JobState::Error),
            "deleted" => Ok(JobState::Deleted),
            "paused" => Ok(JobState::Paused),
            other => Err(format!("invalid job state: {other}")),
        }
    }
}

/// An expected output: logical name plus a path (or glob pattern) relative
/// to the job's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl OutputDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

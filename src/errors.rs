// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The per-job variants (`Preparation`, `Launch`, `Execution`, `Submission`,
//! `Transport`) mirror the failure taxonomy recorded on finished jobs; the
//! rest are configuration and plumbing errors.

use thiserror::Error;

use crate::types::{JobId, JobState};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Preparation failed: {0}")]
    Preparation(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Job {0} has already been dispatched")]
    DuplicateJob(JobId),

    #[error("Job {job}: illegal state transition {from} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0}: results already recorded")]
    ResultsAlreadyRecorded(JobId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for RunnerError {
    fn from(err: reqwest::Error) -> Self {
        RunnerError::Transport(err.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunnerError>;

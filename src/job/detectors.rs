// src/job/detectors.rs

//! Stdio-based error detectors.
//!
//! A tool may declare regexes over its captured stdout/stderr. A `fatal`
//! match turns an otherwise successful (exit code 0) process into a failed
//! job; a `warning` match is only logged.

use regex::Regex;
use serde::Deserialize;

use crate::errors::{Result, RunnerError};

/// Which captured stream a detector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioStream {
    Stdout,
    Stderr,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorLevel {
    #[default]
    Fatal,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ErrorDetector {
    pub stream: StdioStream,
    pub pattern: Regex,
    pub level: DetectorLevel,
    pub description: Option<String>,
}

/// A detector that matched, with the offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorMatch {
    pub level: DetectorLevel,
    pub stream: StdioStream,
    pub line: String,
    pub description: Option<String>,
}

impl ErrorDetector {
    /// Compile a detector. Patterns are matched per line, so `^`/`$` anchor
    /// at line boundaries.
    pub fn new(
        pattern: &str,
        stream: StdioStream,
        level: DetectorLevel,
        description: Option<String>,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            RunnerError::Config(format!("invalid error pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            stream,
            pattern,
            level,
            description,
        })
    }

    pub fn fatal(pattern: &str) -> Result<Self> {
        Self::new(pattern, StdioStream::Both, DetectorLevel::Fatal, None)
    }

    /// First matching line, checking stdout before stderr.
    pub fn scan(&self, stdout: &str, stderr: &str) -> Option<DetectorMatch> {
        let streams = match self.stream {
            StdioStream::Stdout => vec![(StdioStream::Stdout, stdout)],
            StdioStream::Stderr => vec![(StdioStream::Stderr, stderr)],
            StdioStream::Both => vec![
                (StdioStream::Stdout, stdout),
                (StdioStream::Stderr, stderr),
            ],
        };

        streams.into_iter().find_map(|(stream, text)| {
            text.lines()
                .find(|line| self.pattern.is_match(line))
                .map(|line| DetectorMatch {
                    level: self.level,
                    stream,
                    line: line.to_string(),
                    description: self.description.clone(),
                })
        })
    }
}

/// Run every detector and return all matches, fatal ones first.
pub fn scan_all(detectors: &[ErrorDetector], stdout: &str, stderr: &str) -> Vec<DetectorMatch> {
    let mut matches: Vec<DetectorMatch> = detectors
        .iter()
        .filter_map(|d| d.scan(stdout, stderr))
        .collect();
    matches.sort_by_key(|m| m.level != DetectorLevel::Fatal);
    matches
}

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result;
use crate::job::{DetectorLevel, ErrorDetector, JobSpec, StdioStream};
use crate::remote::{RemoteConfig, RemoteRunnerOptions};
use crate::types::OutputDescriptor;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [manager]
/// default_destination = "local"
///
/// [destination.local]
/// runner = "local"
/// workers = 4
///
/// [destination.cluster]
/// runner = "remote"
/// url = "http://127.0.0.1:8913"
/// fallback = "local"
///
/// [job.align]
/// cmd = "bwa mem ref.fa reads.fq"
/// destination = "cluster"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub manager: ManagerSection,

    /// Destinations from `[destination.<name>]`.
    #[serde(default)]
    pub destination: BTreeMap<String, DestinationConfig>,

    /// Jobs from `[job.<id>]`. The key is the job id.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holders can rely on
/// every destination reference resolving and fallback chains terminating.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub manager: ManagerSection,
    pub destination: BTreeMap<String, DestinationConfig>,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        manager: ManagerSection,
        destination: BTreeMap<String, DestinationConfig>,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self {
            manager,
            destination,
            job,
        }
    }

    /// Destination used for jobs that do not name one.
    pub fn default_destination(&self) -> Option<&str> {
        effective_default_destination(&self.manager, &self.destination)
    }
}

/// `manager.default_destination`, or the only destination if there is
/// exactly one.
pub(crate) fn effective_default_destination<'a>(
    manager: &'a ManagerSection,
    destinations: &'a BTreeMap<String, DestinationConfig>,
) -> Option<&'a str> {
    match &manager.default_destination {
        Some(name) => Some(name.as_str()),
        None if destinations.len() == 1 => destinations.keys().next().map(String::as_str),
        None => None,
    }
}

/// `[manager]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ManagerSection {
    #[serde(default)]
    pub default_destination: Option<String>,
}

/// Which backend serves a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Local,
    Remote,
}

/// `[destination.<name>]` section.
///
/// Local and remote settings share one table; fields that do not apply to
/// the chosen `runner` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub runner: RunnerKind,

    /// Worker pool size for `runner = "local"`.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Service base URL for `runner = "remote"`.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub private_token: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Destination to try when this one rejects a job.
    #[serde(default)]
    pub fallback: Option<String>,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_failures() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl DestinationConfig {
    pub fn local(workers: usize) -> Self {
        Self {
            runner: RunnerKind::Local,
            workers,
            url: None,
            private_token: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_failures: default_max_poll_failures(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            fallback: None,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            runner: RunnerKind::Remote,
            url: Some(url.into()),
            ..Self::local(default_workers())
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            url: self.url.clone(),
            private_token: self.private_token.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn remote_options(&self) -> RemoteRunnerOptions {
        RemoteRunnerOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_failures: self.max_poll_failures,
        }
    }
}

/// `[job.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub cmd: String,

    /// Relative paths are resolved against the config file's directory.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// If `None`, the manager's default destination is used.
    #[serde(default)]
    pub destination: Option<String>,

    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    #[serde(default)]
    pub error_patterns: Vec<ErrorPatternConfig>,
}

/// Entry of `outputs = [{ name = "bam", path = "out.bam" }]`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub name: String,
    /// Path or glob pattern, relative to the working directory.
    pub path: PathBuf,
}

/// Entry of `error_patterns = [{ pattern = "^Error", stream = "stderr" }]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPatternConfig {
    pub pattern: String,
    #[serde(default)]
    pub stream: StdioStream,
    #[serde(default)]
    pub level: DetectorLevel,
    #[serde(default)]
    pub description: Option<String>,
}

impl ErrorPatternConfig {
    pub fn to_detector(&self) -> Result<ErrorDetector> {
        ErrorDetector::new(
            &self.pattern,
            self.stream,
            self.level,
            self.description.clone(),
        )
    }
}

impl JobConfig {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            working_directory: None,
            destination: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            error_patterns: Vec::new(),
        }
    }

    /// Build the submission for this job.
    ///
    /// `base_dir` anchors a relative (or missing) working directory.
    pub fn to_spec(&self, id: &str, base_dir: &Path) -> Result<JobSpec> {
        let working_directory = match &self.working_directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        let mut spec = JobSpec::new(id, self.cmd.clone(), working_directory);
        if let Some(dest) = &self.destination {
            spec = spec.with_destination(dest.clone());
        }
        for input in &self.inputs {
            spec = spec.with_input(input.clone());
        }
        for output in &self.outputs {
            spec = spec.with_output(OutputDescriptor::new(output.name.clone(), output.path.clone()));
        }
        for pattern in &self.error_patterns {
            spec = spec.with_detector(pattern.to_detector()?);
        }
        Ok(spec)
    }
}

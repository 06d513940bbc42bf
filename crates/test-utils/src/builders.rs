#![allow(dead_code)]

use std::path::PathBuf;

use jobrunner::config::{
    ConfigFile, DestinationConfig, ErrorPatternConfig, JobConfig, OutputConfig, RawConfigFile,
};
use jobrunner::errors::Result;
use jobrunner::job::{DetectorLevel, StdioStream};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_destination(mut self, name: &str, dest: DestinationConfig) -> Self {
        self.config.destination.insert(name.to_string(), dest);
        self
    }

    pub fn with_default_destination(mut self, name: &str) -> Self {
        self.config.manager.default_destination = Some(name.to_string());
        self
    }

    pub fn with_job(mut self, id: &str, job: JobConfig) -> Self {
        self.config.job.insert(id.to_string(), job);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `DestinationConfig`.
pub struct DestinationBuilder {
    dest: DestinationConfig,
}

impl DestinationBuilder {
    pub fn local(workers: usize) -> Self {
        Self {
            dest: DestinationConfig::local(workers),
        }
    }

    pub fn remote(url: &str) -> Self {
        Self {
            dest: DestinationConfig::remote(url),
        }
    }

    pub fn without_url(mut self) -> Self {
        self.dest.url = None;
        self
    }

    pub fn fallback(mut self, name: &str) -> Self {
        self.dest.fallback = Some(name.to_string());
        self
    }

    pub fn private_token(mut self, token: &str) -> Self {
        self.dest.private_token = Some(token.to_string());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.dest.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_failures(mut self, n: u32) -> Self {
        self.dest.max_poll_failures = n;
        self
    }

    pub fn build(self) -> DestinationConfig {
        self.dest
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            job: JobConfig::new(cmd),
        }
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job.working_directory = Some(dir.into());
        self
    }

    pub fn destination(mut self, name: &str) -> Self {
        self.job.destination = Some(name.to_string());
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.job.inputs.push(path.into());
        self
    }

    pub fn output(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.job.outputs.push(OutputConfig {
            name: name.to_string(),
            path: path.into(),
        });
        self
    }

    pub fn error_pattern(mut self, pattern: &str, stream: StdioStream, level: DetectorLevel) -> Self {
        self.job.error_patterns.push(ErrorPatternConfig {
            pattern: pattern.to_string(),
            stream,
            level,
            description: None,
        });
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

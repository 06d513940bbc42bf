// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `jobrunner`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobrunner",
    version,
    about = "Run configured jobs on local worker pools or remote execution services.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Jobrunner.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Jobrunner.toml")]
    pub config: String,

    /// Submit only this job (repeatable). Default: every configured job.
    #[arg(long = "job", value_name = "ID")]
    pub jobs: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBRUNNER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Give up waiting for jobs after this many seconds; unfinished jobs
    /// are stopped.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Parse + validate, print destinations and jobs, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

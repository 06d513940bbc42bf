// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod manager;
pub mod remote;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, JobConfig, RunnerKind};
use crate::store::MemoryJobStore;
use crate::types::{JobId, JobState};

pub use crate::errors::RunnerError;
pub use crate::job::{JobSpec, JobWrapper};
pub use crate::manager::JobManager;

/// How long stopped jobs get to reach a terminal state before we give up.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// High-level entry point used by `main.rs`.
///
/// Loads the config, submits the selected jobs, waits for them and prints a
/// summary. Returns `Ok(true)` when every job ended `ok`.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let selected = select_jobs(&cfg, &args.jobs)?;

    if args.dry_run {
        print_dry_run(&cfg, &selected);
        return Ok(true);
    }

    let base_dir = config_root_dir(&config_path);
    let store = Arc::new(MemoryJobStore::new());
    let manager = JobManager::from_config(&cfg, store.clone())?;

    let mut ids: Vec<JobId> = Vec::with_capacity(selected.len());
    for (id, job) in selected.iter() {
        let spec = job
            .to_spec(id, &base_dir)
            .with_context(|| format!("preparing job '{id}'"))?;
        ids.push(spec.id.clone());
        if let Err(e) = manager.submit(spec).await {
            // The job has been recorded as failed; keep going with the rest.
            warn!(job = %id, error = %e, "job submission failed");
        }
    }
    info!(jobs = ids.len(), "all jobs submitted");

    let finished = tokio::select! {
        _ = wait_all(&store, &ids) => true,
        _ = shutdown_signal() => {
            info!("interrupted; stopping jobs");
            false
        }
        _ = deadline(args.timeout_secs) => {
            warn!(timeout_secs = ?args.timeout_secs, "timed out waiting for jobs; stopping them");
            false
        }
    };

    if !finished {
        for id in ids.iter() {
            let terminal = store.state(id).is_some_and(|s| s.is_terminal());
            if !terminal {
                manager.stop(id).await;
            }
        }
        let _ = tokio::time::timeout(STOP_GRACE, wait_all(&store, &ids)).await;
    }

    manager.shutdown().await;

    Ok(print_summary(&store, &ids))
}

/// Jobs to submit, in job-id order. An empty selection means all jobs.
fn select_jobs<'a>(cfg: &'a ConfigFile, wanted: &[String]) -> Result<Vec<(&'a str, &'a JobConfig)>> {
    if wanted.is_empty() {
        return Ok(cfg.job.iter().map(|(id, job)| (id.as_str(), job)).collect());
    }

    let mut selected = Vec::with_capacity(wanted.len());
    for id in wanted {
        match cfg.job.get_key_value(id) {
            Some((id, job)) => selected.push((id.as_str(), job)),
            None => bail!("unknown job '{id}' (not in config)"),
        }
    }
    Ok(selected)
}

async fn wait_all(store: &MemoryJobStore, ids: &[JobId]) {
    for id in ids {
        // Submission failures are already terminal; this returns at once.
        store.wait_for_terminal(id, Duration::MAX).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

async fn deadline(timeout_secs: Option<u64>) {
    match timeout_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Print one line per job; returns whether every job ended `ok`.
fn print_summary(store: &MemoryJobStore, ids: &[JobId]) -> bool {
    let mut all_ok = true;
    for id in ids {
        let record = store.record(id);
        let state = record.as_ref().map(|r| r.state);
        if state != Some(JobState::Ok) {
            all_ok = false;
        }

        let state_str = state.map_or_else(|| "unknown".to_string(), |s| s.to_string());
        let results = record.and_then(|r| r.results);
        let exit = results
            .as_ref()
            .and_then(|r| r.exit_code)
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let detail = results
            .as_ref()
            .and_then(|r| r.failure.as_ref())
            .map(|f| format!("  ({}: {})", f.kind, f.reason))
            .unwrap_or_default();
        let outputs = results.as_ref().map_or(0, |r| r.outputs.len());

        println!("{id}  {state_str}  exit={exit}  outputs={outputs}{detail}");
    }
    all_ok
}

/// Relative working directories are anchored at the config file's directory.
///
/// - If the config path has a non-empty parent (e.g. "jobs/Jobrunner.toml"),
///   we use that directory.
/// - If it's just a bare filename (parent = ""), we fall back to the current
///   working directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: print destinations and the jobs that would run.
fn print_dry_run(cfg: &ConfigFile, selected: &[(&str, &JobConfig)]) {
    println!("jobrunner dry-run");
    if let Some(default) = cfg.default_destination() {
        println!("  default destination = {default}");
    }
    println!();

    println!("destinations ({}):", cfg.destination.len());
    for (name, dest) in cfg.destination.iter() {
        match dest.runner {
            RunnerKind::Local => println!("  - {name}: local, {} workers", dest.workers),
            RunnerKind::Remote => println!(
                "  - {name}: remote, url {}",
                dest.url.as_deref().unwrap_or("<none>")
            ),
        }
        if let Some(ref fallback) = dest.fallback {
            println!("      fallback: {fallback}");
        }
    }
    println!();

    println!("jobs ({}):", selected.len());
    for (id, job) in selected {
        println!("  - {id}");
        println!("      cmd: {}", job.cmd);
        let destination = job
            .destination
            .as_deref()
            .or(cfg.default_destination())
            .unwrap_or("<none>");
        println!("      destination: {destination}");
        if let Some(ref wd) = job.working_directory {
            println!("      working_directory: {}", wd.display());
        }
        if !job.inputs.is_empty() {
            println!("      inputs: {:?}", job.inputs);
        }
        if !job.outputs.is_empty() {
            let names: Vec<&str> = job.outputs.iter().map(|o| o.name.as_str()).collect();
            println!("      outputs: {names:?}");
        }
        if !job.error_patterns.is_empty() {
            println!("      error_patterns: {}", job.error_patterns.len());
        }
    }

    debug!("dry-run complete (no execution)");
}

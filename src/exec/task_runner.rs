// src/exec/task_runner.rs

//! Execution of a single job on a local worker.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exec::normalize::normalize_command_line;
use crate::exec::outputs::collect_outputs;
use crate::fs::FileSystem;
use crate::job::{FailureKind, JobWrapper};

/// Shell exit status for "command not found".
const EXIT_NOT_FOUND: i32 = 127;
/// Shell exit status for "found but not executable".
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// How long the pipes may stay open after the shell itself has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Run one dequeued job to a terminal state.
///
/// Every failure is recorded on the job; nothing here returns an error to
/// the worker loop.
pub async fn run_job(mut job: JobWrapper, fs: &dyn FileSystem, worker: usize) -> JobWrapper {
    // Stopped while still in the queue: never becomes `running`.
    if job.is_cancelled() {
        info!(job = %job.id(), worker, "job stopped before execution");
        if let Err(e) = job.mark_deleted() {
            warn!(job = %job.id(), error = %e, "could not mark stopped job deleted");
        }
        return job;
    }

    if let Err(e) = job.mark_running() {
        error!(job = %job.id(), worker, error = %e, "dequeued job cannot start");
        return job;
    }

    let command_line = match prepare(&job, fs) {
        Ok(cmd) => cmd,
        Err(err) => {
            record(job.fail(FailureKind::Preparation, format!("{err:#}"), true), &job);
            return job;
        }
    };

    if let Err(err) = execute(&mut job, &command_line, fs, worker).await {
        record(job.fail(FailureKind::Launch, format!("{err:#}"), true), &job);
    }
    job
}

/// Resolve the working directory and materialize the command line.
fn prepare(job: &JobWrapper, fs: &dyn FileSystem) -> Result<String> {
    let spec = job.spec();
    if spec.command_line.trim().is_empty() {
        bail!("job '{}' has an empty command line", spec.id);
    }

    fs.create_dir_all(&spec.working_directory)
        .with_context(|| format!("preparing working directory for job '{}'", spec.id))?;

    let base = std::env::current_dir().context("resolving runner working directory")?;
    Ok(normalize_command_line(&spec.command_line, &base, fs))
}

/// Launch the process and wait for it, or for cancellation.
///
/// Only a failure to spawn is returned as an error; everything after that
/// is recorded on the job directly.
async fn execute(
    job: &mut JobWrapper,
    command_line: &str,
    fs: &dyn FileSystem,
    worker: usize,
) -> Result<()> {
    let working_directory: PathBuf = job.spec().working_directory.clone();
    info!(
        job = %job.id(),
        worker,
        cmd = %command_line,
        cwd = %working_directory.display(),
        "starting job process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    };

    cmd.current_dir(&working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{}'", job.id()))?;

    let mut stdout = OutputReader::spawn(child.stdout.take());
    let mut stderr = OutputReader::spawn(child.stderr.take());
    let cancel = job.cancel_token();

    // An exit that is already available wins over a concurrent stop.
    let status = tokio::select! {
        biased;
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            info!(job = %job.id(), worker, "stop requested for running job; killing process");
            if let Err(e) = child.kill().await {
                warn!(job = %job.id(), error = %e, "failed to kill job process");
            }
            // Grandchildren of the shell may still hold the pipes open.
            stdout.abort();
            stderr.abort();
            record(job.mark_deleted(), job);
            return Ok(());
        }
    };

    drain(job, &mut stdout, &mut stderr, &cancel).await;
    let stdout = stdout.contents();
    let stderr = stderr.contents();

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            record(
                job.fail_with_output(
                    FailureKind::Execution,
                    format!("waiting for job process: {e}"),
                    stdout,
                    stderr,
                    None,
                    true,
                ),
                job,
            );
            return Ok(());
        }
    };

    debug!(job = %job.id(), worker, ?status, "job process exited");

    match status.code() {
        Some(code @ (EXIT_NOT_FOUND | EXIT_NOT_EXECUTABLE)) => {
            let reason = match stderr.lines().next() {
                Some(line) if !line.is_empty() => line.to_string(),
                _ => format!("shell exited with {code}: command could not be executed"),
            };
            record(
                job.fail_with_output(FailureKind::Launch, reason, stdout, stderr, Some(code), false),
                job,
            );
        }
        Some(code) => {
            let spec = job.spec();
            let outputs = collect_outputs(&spec.id, &spec.outputs, &working_directory, fs);
            job.register_outputs(outputs);
            if let Err(e) = job.finish(stdout, stderr, code) {
                warn!(job = %job.id(), error = %e, "could not record job completion");
            }
        }
        None => {
            let reason = match signal_of(&status) {
                Some(signal) => format!("process killed by signal {signal}"),
                None => "process terminated without an exit code".to_string(),
            };
            record(
                job.fail_with_output(FailureKind::Execution, reason, stdout, stderr, None, false),
                job,
            );
        }
    }

    Ok(())
}

/// Captures one output pipe into a buffer that survives aborting the reader.
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => lock_buf(&sink).extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "reading job output stopped early");
                        break;
                    }
                }
            }
        });
        Self { buf, handle }
    }

    fn abort(&self) {
        self.handle.abort();
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&lock_buf(&self.buf)).into_owned()
    }
}

/// Wait for both pipes to close after the shell exited.
///
/// Background processes started by the command inherit the pipes and can
/// hold them open indefinitely; those are abandoned after
/// [`PIPE_DRAIN_GRACE`] or as soon as the job is stopped.
async fn drain(
    job: &JobWrapper,
    stdout: &mut OutputReader,
    stderr: &mut OutputReader,
    cancel: &CancellationToken,
) {
    tokio::select! {
        _ = async { tokio::join!(&mut stdout.handle, &mut stderr.handle) } => {}
        _ = cancel.cancelled() => {
            info!(job = %job.id(), "stop requested after process exit; abandoning open output pipes");
        }
        _ = tokio::time::sleep(PIPE_DRAIN_GRACE) => {
            warn!(job = %job.id(), "process exited but its output pipes are still open; abandoning them");
        }
    }
    stdout.abort();
    stderr.abort();
}

fn lock_buf(buf: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(|e| e.into_inner())
}

/// Log a transition the job refused; the job keeps its current state.
fn record(result: crate::errors::Result<()>, job: &JobWrapper) {
    if let Err(e) = result {
        warn!(job = %job.id(), state = %job.state(), error = %e, "job transition rejected");
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

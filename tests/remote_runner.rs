mod common;
use crate::common::{init_tracing, job, new_store, shell_job, terminal, wait_running, with_timeout};

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jobrunner::errors::RunnerError;
use jobrunner::exec::Runner;
use jobrunner::job::{ErrorDetector, FailureKind, JobSpec};
use jobrunner::remote::{
    InProcessTransport, RemoteClient, RemoteConfig, RemoteRunner, RemoteRunnerOptions,
};
use jobrunner::types::{JobId, JobState, OutputDescriptor};
use jobrunner_test_utils::scripted_service::ScriptedService;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn runner_for(service: &Arc<ScriptedService>, max_poll_failures: u32) -> RemoteRunner {
    let transport = InProcessTransport::new(service.clone());
    let client = RemoteClient::with_transport(Arc::new(transport), None);
    RemoteRunner::new(
        client,
        RemoteRunnerOptions {
            poll_interval: Duration::from_millis(10),
            max_poll_failures,
        },
    )
}

async fn eventually(mut check: impl FnMut() -> bool) {
    with_timeout(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

fn spec_in(dir: &Path, id: &str, cmd: &str) -> JobSpec {
    JobSpec::new(id, cmd, dir)
}

#[tokio::test]
async fn remote_job_runs_to_completion_and_outputs_are_fetched() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    std::fs::write(dir.path().join("reads.fq"), b"ACGT")?;

    let service = Arc::new(
        ScriptedService::new()
            .with_polls_to_complete(3)
            .with_result(Some(0), "aligned\n", "")
            .with_output("bam", b"BAM\x01"),
    );
    let store = new_store();
    let runner = runner_for(&service, 3);

    let spec = spec_in(dir.path(), "align", "bwa mem ref.fa reads.fq")
        .with_input("reads.fq")
        .with_output(OutputDescriptor::new("bam", "out.bam"));
    runner.put(job(&store, spec)).await?;

    let record = terminal(&store, "align").await;
    assert_eq!(record.state, JobState::Ok);
    assert_eq!(
        record.history,
        vec![JobState::New, JobState::Queued, JobState::Running, JobState::Ok]
    );
    let results = record.results.expect("results recorded");
    assert_eq!(results.exit_code, Some(0));
    assert_eq!(results.stdout, "aligned\n");
    assert_eq!(results.outputs.len(), 1);
    assert_eq!(results.outputs[0].name, "bam");
    assert_eq!(std::fs::read(dir.path().join("out.bam"))?, b"BAM\x01");

    assert_eq!(service.uploaded("align", "reads.fq"), Some(Bytes::from_static(b"ACGT")));
    assert_eq!(
        service.launched_command("align").as_deref(),
        Some("bwa mem ref.fa reads.fq")
    );
    eventually(|| service.was_cleaned("align")).await;

    let commands = service.commands();
    assert_eq!(&commands[..3], ["setup", "upload_input", "launch"]);
    assert!(commands.iter().filter(|c| *c == "status").count() >= 3);
    assert!(commands.contains(&"download_output".to_string()));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn nonzero_remote_return_code_is_an_execution_error() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_result(Some(3), "", "segfault\n"));
    let store = new_store();
    let runner = runner_for(&service, 3);

    runner.put(shell_job(&store, "crash", "tool --bad", dir.path())).await?;

    let record = terminal(&store, "crash").await;
    assert_eq!(record.state, JobState::Error);
    let results = record.results.expect("results recorded");
    assert_eq!(results.exit_code, Some(3));
    assert_eq!(results.stderr, "segfault\n");
    assert_eq!(results.failure.map(|f| f.kind), Some(FailureKind::Execution));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn completion_without_return_code_is_an_error() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_result(None, "partial", ""));
    let store = new_store();
    let runner = runner_for(&service, 3);

    runner.put(shell_job(&store, "no-rc", "tool", dir.path())).await?;

    let record = terminal(&store, "no-rc").await;
    assert_eq!(record.state, JobState::Error);
    let results = record.results.expect("results recorded");
    assert_eq!(results.exit_code, None);
    assert_eq!(results.stdout, "partial");

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fatal_detector_applies_to_remote_output() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_result(Some(0), "", "Traceback (most recent call last):\n"));
    let store = new_store();
    let runner = runner_for(&service, 3);

    let spec = spec_in(dir.path(), "py", "python tool.py").with_detector(ErrorDetector::fatal("^Traceback")?);
    runner.put(job(&store, spec)).await?;

    let record = terminal(&store, "py").await;
    assert_eq!(record.state, JobState::Error);
    assert_eq!(record.results.and_then(|r| r.exit_code), Some(0));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn transient_poll_failures_are_tolerated() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_status_failures(2));
    let store = new_store();
    let runner = runner_for(&service, 3);

    runner.put(shell_job(&store, "flaky", "tool", dir.path())).await?;

    assert_eq!(terminal(&store, "flaky").await.state, JobState::Ok);

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn persistent_poll_failures_fail_the_job_with_transport_error() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_status_failures(100));
    let store = new_store();
    let runner = runner_for(&service, 2);

    runner.put(shell_job(&store, "lost", "tool", dir.path())).await?;

    let record = terminal(&store, "lost").await;
    assert_eq!(record.state, JobState::Error);
    let failure = record.results.and_then(|r| r.failure).expect("failure recorded");
    assert_eq!(failure.kind, FailureKind::Transport);

    let polls = service.commands().iter().filter(|c| *c == "status").count();
    assert_eq!(polls, 3);

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_launch_hands_the_job_back_as_submission_error() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().rejecting_launch());
    let store = new_store();
    let runner = runner_for(&service, 3);

    let rejected = runner
        .put(shell_job(&store, "refused", "tool", dir.path()))
        .await
        .expect_err("launch is refused");

    assert!(matches!(rejected.error, RunnerError::Submission(_)));
    assert_eq!(rejected.job.state(), JobState::Queued);
    assert!(rejected.job.results().is_none());
    assert_eq!(runner.pending(), 0);
    assert!(!service.commands().contains(&"status".to_string()));
    // The staging area created by `setup` does not outlive the rejection.
    assert!(service.was_cleaned("refused"));
    assert_eq!(service.commands(), ["setup", "launch", "clean"]);
    Ok(())
}

#[tokio::test]
async fn unreachable_service_rejects_on_put() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let config = RemoteConfig::new("http://127.0.0.1:1").with_connect_timeout(Duration::from_secs(1));
    let runner = RemoteRunner::new(RemoteClient::new(&config)?, RemoteRunnerOptions::default());
    let store = new_store();

    let rejected = runner
        .put(shell_job(&store, "offline", "tool", dir.path()))
        .await
        .expect_err("service is unreachable");

    assert!(matches!(rejected.error, RunnerError::Submission(_)));
    Ok(())
}

#[tokio::test]
async fn stop_kills_the_remote_job_and_deletes_it() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_polls_to_complete(100_000));
    let store = new_store();
    let runner = runner_for(&service, 3);

    runner.put(shell_job(&store, "endless", "tool", dir.path())).await?;
    wait_running(&store, "endless").await;

    runner.stop(JobId::from("endless")).await;

    let record = terminal(&store, "endless").await;
    assert_eq!(record.state, JobState::Deleted);
    assert!(service.was_killed("endless"));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_remote_output_is_a_transport_error() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_result(Some(0), "done\n", ""));
    let store = new_store();
    let runner = runner_for(&service, 3);

    let spec = spec_in(dir.path(), "no-out", "tool").with_output(OutputDescriptor::new("report", "report.html"));
    runner.put(job(&store, spec)).await?;

    let record = terminal(&store, "no-out").await;
    assert_eq!(record.state, JobState::Error);
    let results = record.results.expect("results recorded");
    assert_eq!(results.stdout, "done\n");
    assert_eq!(results.failure.map(|f| f.kind), Some(FailureKind::Transport));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_upload_cleans_the_remote_staging_area() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new());
    let store = new_store();
    let runner = runner_for(&service, 3);

    let spec = spec_in(dir.path(), "no-input", "tool in.fq").with_input("in.fq");
    let rejected = runner
        .put(job(&store, spec))
        .await
        .expect_err("input file does not exist");

    assert!(matches!(rejected.error, RunnerError::Submission(_)));
    assert!(service.was_cleaned("no-input"));
    assert!(service.launched_command("no-input").is_none());
    Ok(())
}

#[tokio::test]
async fn pattern_outputs_are_stored_under_their_name() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(
        ScriptedService::new()
            .with_result(Some(0), "", "")
            .with_output("reports", b"summary\n"),
    );
    let store = new_store();
    let runner = runner_for(&service, 3);

    let spec = spec_in(dir.path(), "globbed", "tool").with_output(OutputDescriptor::new("reports", "*.txt"));
    runner.put(job(&store, spec)).await?;

    let record = terminal(&store, "globbed").await;
    assert_eq!(record.state, JobState::Ok);
    let outputs = record.results.expect("results recorded").outputs;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].name, "reports");
    assert_eq!(outputs[0].path, dir.path().join("reports"));
    assert_eq!(std::fs::read(dir.path().join("reports"))?, b"summary\n");
    assert!(!dir.path().join("*.txt").exists());

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_abandons_monitoring_and_refuses_new_jobs() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let service = Arc::new(ScriptedService::new().with_polls_to_complete(100_000));
    let store = new_store();
    let runner = runner_for(&service, 3);

    runner.put(shell_job(&store, "left", "tool", dir.path())).await?;
    wait_running(&store, "left").await;

    runner.shutdown().await;
    runner.shutdown().await;
    eventually(|| runner.pending() == 0).await;

    // The remote side still owns the job; nothing was killed or recorded.
    assert_eq!(store.state(&JobId::from("left")), Some(JobState::Running));
    assert!(!service.was_killed("left"));

    let rejected = runner
        .put(shell_job(&store, "too-late", "tool", dir.path()))
        .await
        .expect_err("runner is shut down");
    assert!(matches!(rejected.error, RunnerError::Submission(_)));
    Ok(())
}

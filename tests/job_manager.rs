mod common;
use crate::common::builders::{ConfigFileBuilder, DestinationBuilder, JobConfigBuilder};
use crate::common::{init_tracing, job, new_store, terminal};

use std::error::Error;
use std::sync::Arc;

use jobrunner::errors::RunnerError;
use jobrunner::job::{FailureKind, JobSpec};
use jobrunner::manager::JobManager;
use jobrunner::types::{JobId, JobState};
use jobrunner_test_utils::fake_runner::RecordingRunner;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn spec(id: &str) -> JobSpec {
    JobSpec::new(id, "true", "/tmp")
}

#[tokio::test]
async fn jobs_are_routed_by_destination() -> TestResult {
    init_tracing();
    let store = new_store();
    let fast = Arc::new(RecordingRunner::holding("fast"));
    let slow = Arc::new(RecordingRunner::holding("slow"));

    let mut manager = JobManager::new(store.clone());
    manager.register("fast", fast.clone());
    manager.register("slow", slow.clone());
    let manager = manager.with_default_destination("fast");

    manager.submit(spec("a")).await?;
    manager.submit(spec("b").with_destination("slow")).await?;

    assert_eq!(fast.accepted(), vec![JobId::from("a")]);
    assert_eq!(slow.accepted(), vec![JobId::from("b")]);
    assert_eq!(manager.assignment(&JobId::from("b")).as_deref(), Some("slow"));
    assert_eq!(store.state(&JobId::from("a")), Some(JobState::Queued));
    Ok(())
}

#[tokio::test]
async fn duplicate_job_ids_are_never_dispatched_twice() -> TestResult {
    init_tracing();
    let store = new_store();
    let runner = Arc::new(RecordingRunner::holding("local"));
    let mut manager = JobManager::new(store.clone());
    manager.register("local", runner.clone());
    let manager = manager.with_default_destination("local");

    manager.submit(spec("once")).await?;
    let second = manager.submit(spec("once")).await;

    assert!(matches!(second, Err(RunnerError::DuplicateJob(id)) if id.as_str() == "once"));
    assert_eq!(runner.accepted().len(), 1);
    assert_eq!(
        store.history(&JobId::from("once")),
        vec![JobState::New, JobState::Queued]
    );
    Ok(())
}

#[tokio::test]
async fn unknown_destination_fails_the_job() -> TestResult {
    init_tracing();
    let store = new_store();
    let mut manager = JobManager::new(store.clone());
    manager.register("local", Arc::new(RecordingRunner::holding("local")));

    let result = manager.submit(spec("lost").with_destination("mars")).await;

    assert!(matches!(result, Err(RunnerError::UnknownDestination(d)) if d == "mars"));
    let record = terminal(&store, "lost").await;
    assert_eq!(record.state, JobState::Error);
    assert_eq!(
        record.results.and_then(|r| r.failure).map(|f| f.kind),
        Some(FailureKind::Submission)
    );
    Ok(())
}

#[tokio::test]
async fn no_destination_and_no_default_fails_the_job() -> TestResult {
    init_tracing();
    let store = new_store();
    let mut manager = JobManager::new(store.clone());
    manager.register("local", Arc::new(RecordingRunner::holding("local")));

    let result = manager.submit(spec("nowhere")).await;

    assert!(matches!(result, Err(RunnerError::UnknownDestination(_))));
    assert_eq!(store.state(&JobId::from("nowhere")), Some(JobState::Error));
    Ok(())
}

#[tokio::test]
async fn rejected_jobs_move_to_the_fallback_destination() -> TestResult {
    init_tracing();
    let store = new_store();
    let cluster = Arc::new(RecordingRunner::rejecting("cluster"));
    let local = Arc::new(RecordingRunner::completing("local"));

    let mut manager = JobManager::new(store.clone());
    manager.register("cluster", cluster.clone());
    manager.register("local", local.clone());
    manager.set_fallback("cluster", "local");

    manager.submit(spec("retry").with_destination("cluster")).await?;

    assert!(cluster.accepted().is_empty());
    assert_eq!(local.accepted(), vec![JobId::from("retry")]);
    let record = terminal(&store, "retry").await;
    assert_eq!(record.state, JobState::Ok);
    assert_eq!(
        record.history,
        vec![JobState::New, JobState::Queued, JobState::Running, JobState::Ok]
    );
    Ok(())
}

#[tokio::test]
async fn exhausted_fallback_chain_fails_the_job() -> TestResult {
    init_tracing();
    let store = new_store();
    let mut manager = JobManager::new(store.clone());
    manager.register("a", Arc::new(RecordingRunner::rejecting("a")));
    manager.register("b", Arc::new(RecordingRunner::rejecting("b")));
    manager.set_fallback("a", "b");
    manager.set_fallback("b", "a");

    let result = manager.submit(spec("doomed").with_destination("a")).await;

    match result {
        Err(RunnerError::Submission(msg)) => assert!(msg.contains("a, b")),
        other => panic!("expected submission error, got {other:?}"),
    }
    let record = terminal(&store, "doomed").await;
    assert_eq!(record.state, JobState::Error);
    assert_eq!(
        record.results.and_then(|r| r.failure).map(|f| f.kind),
        Some(FailureKind::Submission)
    );
    Ok(())
}

#[tokio::test]
async fn stop_reaches_the_accepting_runner_only() -> TestResult {
    init_tracing();
    let store = new_store();
    let one = Arc::new(RecordingRunner::holding("one"));
    let two = Arc::new(RecordingRunner::holding("two"));
    let mut manager = JobManager::new(store.clone());
    manager.register("one", one.clone());
    manager.register("two", two.clone());

    manager.submit(spec("held").with_destination("two")).await?;
    manager.stop(&JobId::from("held")).await;
    manager.stop(&JobId::from("never-submitted")).await;

    assert!(one.stopped().is_empty());
    assert_eq!(two.stopped(), vec![JobId::from("held")]);
    assert_eq!(terminal(&store, "held").await.state, JobState::Deleted);
    Ok(())
}

#[tokio::test]
async fn shutdown_reaches_every_runner_once() -> TestResult {
    init_tracing();
    let store = new_store();
    let one = Arc::new(RecordingRunner::holding("one"));
    let two = Arc::new(RecordingRunner::holding("two"));
    let mut manager = JobManager::new(store.clone());
    manager.register("one", one.clone());
    manager.register("two", two.clone());

    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(one.shutdown_calls(), 1);
    assert_eq!(two.shutdown_calls(), 1);

    let result = manager.submit(spec("late").with_destination("one")).await;
    assert!(matches!(result, Err(RunnerError::Submission(_))));
    assert!(one.accepted().is_empty());
    assert_eq!(store.state(&JobId::from("late")), Some(JobState::Error));
    Ok(())
}

#[tokio::test]
async fn put_accepts_prebuilt_job_handles() -> TestResult {
    init_tracing();
    let store = new_store();
    let runner = Arc::new(RecordingRunner::completing("local"));
    let mut manager = JobManager::new(store.clone());
    manager.register("local", runner.clone());
    let manager = manager.with_default_destination("local");

    manager.put(job(&store, spec("handle"))).await?;

    assert_eq!(terminal(&store, "handle").await.state, JobState::Ok);
    Ok(())
}

#[tokio::test]
async fn assignment_outlives_the_job() -> TestResult {
    init_tracing();
    let store = new_store();
    let mut manager = JobManager::new(store.clone());
    manager.register("local", Arc::new(RecordingRunner::completing("local")));
    let manager = manager.with_default_destination("local");

    manager.submit(spec("done")).await?;

    assert_eq!(terminal(&store, "done").await.state, JobState::Ok);
    assert_eq!(manager.assignment(&JobId::from("done")).as_deref(), Some("local"));
    assert_eq!(manager.assignment(&JobId::from("other")), None);
    Ok(())
}

#[tokio::test]
async fn manager_from_config_runs_local_jobs_and_falls_back_from_remote() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let cfg = ConfigFileBuilder::new()
        .with_destination("local", DestinationBuilder::local(2).build())
        .with_destination(
            "cluster",
            DestinationBuilder::remote("http://127.0.0.1:1")
                .fallback("local")
                .build(),
        )
        .with_default_destination("local")
        .with_job("plain", JobConfigBuilder::new("echo plain").build())
        .with_job(
            "offloaded",
            JobConfigBuilder::new("echo offloaded").destination("cluster").build(),
        )
        .build();

    let store = new_store();
    let manager = JobManager::from_config(&cfg, store.clone())?;
    assert_eq!(manager.destinations().collect::<Vec<_>>(), vec!["cluster", "local"]);
    assert_eq!(manager.default_destination(), Some("local"));

    for (id, job_cfg) in cfg.job.iter() {
        manager.submit(job_cfg.to_spec(id, dir.path())?).await?;
    }

    for id in ["plain", "offloaded"] {
        let record = terminal(&store, id).await;
        assert_eq!(record.state, JobState::Ok, "job {id}");
    }
    assert_eq!(
        manager.assignment(&JobId::from("offloaded")).as_deref(),
        Some("local")
    );
    assert_eq!(
        store.results(&JobId::from("offloaded")).map(|r| r.stdout),
        Some("offloaded\n".to_string())
    );

    manager.shutdown().await;
    Ok(())
}

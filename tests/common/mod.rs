#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jobrunner::job::{JobSpec, JobWrapper};
use jobrunner::store::{JobRecord, MemoryJobStore};
use jobrunner::types::JobId;

pub use jobrunner_test_utils::builders;
pub use jobrunner_test_utils::{init_tracing, with_timeout, TEST_TIMEOUT};

/// A fresh store plus a helper to wrap specs reporting to it.
pub fn new_store() -> Arc<MemoryJobStore> {
    Arc::new(MemoryJobStore::new())
}

pub fn job(store: &Arc<MemoryJobStore>, spec: JobSpec) -> JobWrapper {
    JobWrapper::new(spec, store.clone())
}

pub fn shell_job(store: &Arc<MemoryJobStore>, id: &str, cmd: &str, dir: &Path) -> JobWrapper {
    job(store, JobSpec::new(id, cmd, dir))
}

/// Wait for a terminal state, panicking after [`TEST_TIMEOUT`].
pub async fn terminal(store: &MemoryJobStore, id: &str) -> JobRecord {
    store
        .wait_for_terminal(&JobId::from(id), TEST_TIMEOUT)
        .await
        .unwrap_or_else(|| panic!("job {id} did not finish in time"))
}

pub async fn wait_running(store: &MemoryJobStore, id: &str) {
    let running = store
        .wait_for_state(&JobId::from(id), jobrunner::types::JobState::Running, TEST_TIMEOUT)
        .await;
    assert!(running, "job {id} never started");
}

pub const SHORT: Duration = Duration::from_millis(200);

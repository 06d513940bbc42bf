use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use bytes::Bytes;
use serde_json::json;

use jobrunner::errors::{Result, RunnerError};
use jobrunner::remote::{RemoteService, PRIVATE_KEY_ARG};

/// One call the service received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: String,
    pub args: BTreeMap<String, String>,
    pub body: Option<Bytes>,
}

#[derive(Debug, Default)]
struct RemoteJob {
    command_line: Option<String>,
    uploads: HashMap<String, Bytes>,
    polls: u32,
    killed: bool,
    cleaned: bool,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, RemoteJob>,
    calls: Vec<RecordedCall>,
    status_failures_left: u32,
}

/// In-memory remote execution service with scripted behaviour.
///
/// Every launched job reports `queued` on its first poll, `running` until
/// `polls_to_complete` polls have been made, then `complete` with the
/// scripted return code and stdio.
#[derive(Debug)]
pub struct ScriptedService {
    polls_to_complete: u32,
    returncode: Option<i32>,
    stdout: String,
    stderr: String,
    outputs: HashMap<String, Bytes>,
    token: Option<String>,
    reject_launch: bool,
    state: Mutex<State>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedService {
    pub fn new() -> Self {
        Self {
            polls_to_complete: 2,
            returncode: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            outputs: HashMap::new(),
            token: None,
            reject_launch: false,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_polls_to_complete(mut self, polls: u32) -> Self {
        self.polls_to_complete = polls;
        self
    }

    pub fn with_result(mut self, returncode: Option<i32>, stdout: &str, stderr: &str) -> Self {
        self.returncode = returncode;
        self.stdout = stdout.to_string();
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_output(mut self, name: &str, contents: &[u8]) -> Self {
        self.outputs
            .insert(name.to_string(), Bytes::copy_from_slice(contents));
        self
    }

    /// Reject every call whose `private_key` is not `token`.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// The next `n` `status` calls fail.
    pub fn with_status_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().status_failures_left = n;
        self
    }

    pub fn rejecting_launch(mut self) -> Self {
        self.reject_launch = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    pub fn uploaded(&self, job: &str, name: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();
        state.jobs.get(job).and_then(|j| j.uploads.get(name).cloned())
    }

    pub fn launched_command(&self, job: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.jobs.get(job).and_then(|j| j.command_line.clone())
    }

    pub fn was_killed(&self, job: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.jobs.get(job).is_some_and(|j| j.killed)
    }

    pub fn was_cleaned(&self, job: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.jobs.get(job).is_some_and(|j| j.cleaned)
    }

    fn status(&self, job: &mut RemoteJob) -> serde_json::Value {
        job.polls += 1;
        if job.killed {
            return json!({ "status": "complete", "returncode": -9 });
        }
        if job.polls == 1 && self.polls_to_complete > 1 {
            return json!({ "status": "queued" });
        }
        if job.polls < self.polls_to_complete {
            return json!({ "status": "running" });
        }
        json!({
            "status": "complete",
            "returncode": self.returncode,
            "stdout": self.stdout,
            "stderr": self.stderr,
        })
    }
}

fn transport(msg: String) -> RunnerError {
    RunnerError::Transport(msg)
}

fn encode(value: serde_json::Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(&value)?))
}

impl RemoteService for ScriptedService {
    fn handle(
        &self,
        command: &str,
        args: &BTreeMap<String, String>,
        body: Option<Bytes>,
    ) -> Result<Bytes> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            command: command.to_string(),
            args: args.clone(),
            body: body.clone(),
        });

        if let Some(token) = &self.token {
            if args.get(PRIVATE_KEY_ARG) != Some(token) {
                return Err(transport(format!("{command}: 403 Forbidden")));
            }
        }

        let job_id = args
            .get("job_id")
            .cloned()
            .ok_or_else(|| transport(format!("{command}: missing job_id")))?;

        match command {
            "setup" => {
                state.jobs.insert(job_id.clone(), RemoteJob::default());
                encode(json!({
                    "job_id": job_id,
                    "working_directory": format!("/remote/{job_id}"),
                }))
            }
            "upload_input" => {
                let name = args
                    .get("name")
                    .cloned()
                    .ok_or_else(|| transport("upload_input: missing name".to_string()))?;
                let job = state
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| transport(format!("upload_input: unknown job {job_id}")))?;
                job.uploads.insert(name.clone(), body.unwrap_or_default());
                encode(json!({ "path": format!("/remote/{job_id}/{name}") }))
            }
            "launch" => {
                if self.reject_launch {
                    return Err(transport("launch: 503 Service Unavailable".to_string()));
                }
                let job = state
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| transport(format!("launch: unknown job {job_id}")))?;
                job.command_line = args.get("command_line").cloned();
                encode(json!({}))
            }
            "status" => {
                if state.status_failures_left > 0 {
                    state.status_failures_left -= 1;
                    return Err(transport("status: 502 Bad Gateway".to_string()));
                }
                let mut job = state
                    .jobs
                    .remove(&job_id)
                    .ok_or_else(|| transport(format!("status: unknown job {job_id}")))?;
                let status = self.status(&mut job);
                state.jobs.insert(job_id, job);
                encode(status)
            }
            "download_output" => {
                let name = args.get("name").cloned().unwrap_or_default();
                self.outputs
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| transport(format!("download_output: 404 no output {name}")))
            }
            "kill" | "clean" => {
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    if command == "kill" {
                        job.killed = true;
                    } else {
                        job.cleaned = true;
                    }
                }
                encode(json!({}))
            }
            other => Err(transport(format!("{other}: 404 unknown command"))),
        }
    }
}

// src/exec/mod.rs

//! Local process execution.
//!
//! - [`backend`] defines the `Runner` trait every execution backend
//!   implements (local pool, remote service, test fakes).
//! - [`local`] owns the fixed-size worker pool and its FIFO queue.
//! - [`task_runner`] runs one dequeued job: prepare, launch, wait, record.
//! - [`normalize`] rewrites relative file arguments to absolute paths.
//! - [`outputs`] resolves declared outputs once a job has run.

pub mod backend;
pub mod local;
pub mod normalize;
pub mod outputs;
pub mod task_runner;

pub use backend::{Rejected, Runner, RunnerFuture};
pub use local::LocalRunner;
pub use normalize::normalize_command_line;
pub use outputs::collect_outputs;

//! # Task Execution
//!
//! Dispatchers that start tasks under a concurrency ceiling.
//!
//! - [`TaskRunner`]: one OS process per task, exit codes collected by the
//!   [`ProcessPoller`]
//! - [`LocalTaskRunner`]: runs tasks on the current tokio runtime
//!
//! Both implement [`TaskDispatcher`], which is what the job driver talks to.

mod in_flight;
pub mod local_runner;
pub mod process_poller;
pub mod task_runner;

pub use local_runner::LocalTaskRunner;
pub use process_poller::{ExitCallback, ProcessPoller};
pub use task_runner::{CompletionCallback, RunAck, TaskDispatcher, TaskRunner, TaskRunnerError};

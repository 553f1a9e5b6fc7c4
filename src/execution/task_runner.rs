//! # Task Runner
//!
//! Bounded-concurrency launcher running each task in its own OS process.
//!
//! ## Overview
//!
//! `run(task_id, on_complete)` launches `runner_command + [task_id]` and returns
//! at once. When the number of in-flight processes has reached the ceiling it
//! fails immediately with [`TaskRunnerError::AtMaximumConcurrency`]; callers
//! back off and retry later. The exit code reaches `on_complete` through the
//! shared [`ProcessPoller`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rfm_jobs::execution::TaskRunner;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = TaskRunner::new(4, vec!["rfm-task-runner".into()], Duration::from_millis(500));
//! runner.run(42, Box::new(|code| println!("task 42 exited with {code}")))?;
//! # Ok(())
//! # }
//! ```

use super::in_flight::InFlightSet;
use super::process_poller::ProcessPoller;
use crate::config::{effective_parallelism, TaskRunnerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Invoked once with the task's exit code
pub type CompletionCallback = Box<dyn FnOnce(i32) + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum TaskRunnerError {
    /// The ceiling is reached; nothing was launched
    #[error("At maximum concurrency: {in_flight} of {max_concurrency} tasks in flight")]
    AtMaximumConcurrency {
        max_concurrency: usize,
        in_flight: usize,
    },

    #[error("Failed to launch task {task_id}: {source}")]
    Launch {
        task_id: i64,
        #[source]
        source: std::io::Error,
    },
}

/// Acknowledgement that a task was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAck {
    pub task_id: i64,
}

/// Something that can start tasks under a concurrency ceiling
pub trait TaskDispatcher: Send + Sync {
    /// Start `task_id`; never blocks waiting for capacity
    fn dispatch(&self, task_id: i64, on_complete: CompletionCallback) -> Result<RunAck, TaskRunnerError>;

    fn in_flight(&self) -> usize;

    fn max_concurrency(&self) -> usize;
}

/// One OS process per task
pub struct TaskRunner {
    runner_command: Vec<String>,
    in_flight: Arc<InFlightSet>,
    poller: Arc<ProcessPoller>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("runner_command", &self.runner_command)
            .field("max_concurrency", &self.in_flight.max_concurrency())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl TaskRunner {
    /// `max_concurrency` of zero means one process per available core
    pub fn new(max_concurrency: usize, runner_command: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            runner_command,
            in_flight: Arc::new(InFlightSet::new(effective_parallelism(max_concurrency))),
            poller: ProcessPoller::new(poll_interval),
        }
    }

    pub fn from_config(config: &TaskRunnerConfig) -> Self {
        Self::new(
            config.effective_max_concurrency(),
            config.runner_command.clone(),
            config.poll_interval(),
        )
    }

    /// Launch the runner command for `task_id`
    pub fn run(&self, task_id: i64, on_complete: CompletionCallback) -> Result<RunAck, TaskRunnerError> {
        let entry_id = self.in_flight.try_reserve(task_id)?;

        let mut args = self.runner_command.clone();
        args.push(task_id.to_string());

        let in_flight = Arc::clone(&self.in_flight);
        let resolve = Box::new(move |exit_code: i32| {
            let elapsed = in_flight.release(entry_id);
            debug!(task_id, exit_code, elapsed_ms = ?elapsed.map(|d| d.as_millis()), "Task process resolved");
            on_complete(exit_code);
        });

        match self.poller.launch(&args, resolve) {
            Ok(pid) => {
                info!(task_id, pid = ?pid, in_flight = self.in_flight.len(), "🚀 Launched task process");
                Ok(RunAck { task_id })
            }
            Err(source) => {
                self.in_flight.release(entry_id);
                Err(TaskRunnerError::Launch { task_id, source })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_task_ids(&self) -> Vec<i64> {
        self.in_flight.task_ids()
    }

    pub fn max_concurrency(&self) -> usize {
        self.in_flight.max_concurrency()
    }
}

impl TaskDispatcher for TaskRunner {
    fn dispatch(&self, task_id: i64, on_complete: CompletionCallback) -> Result<RunAck, TaskRunnerError> {
        self.run(task_id, on_complete)
    }

    fn in_flight(&self) -> usize {
        TaskRunner::in_flight(self)
    }

    fn max_concurrency(&self) -> usize {
        TaskRunner::max_concurrency(self)
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.poller.shutdown();
    }
}

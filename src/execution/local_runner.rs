//! In-process dispatcher: runs `execute_task` on the tokio runtime instead of
//! spawning a runner process. Same ceiling semantics as `TaskRunner`.

use super::in_flight::InFlightSet;
use super::task_runner::{CompletionCallback, RunAck, TaskDispatcher, TaskRunnerError};
use crate::config::effective_parallelism;
use crate::orchestration::task::{execute_task, TaskEnvironment};
use std::sync::Arc;
use tracing::{debug, error};

/// Exit code reported when the task future panicked
const PANICKED_EXIT_CODE: i32 = -1;

#[derive(Debug)]
pub struct LocalTaskRunner {
    env: TaskEnvironment,
    in_flight: Arc<InFlightSet>,
}

impl LocalTaskRunner {
    /// `max_concurrency` of zero means one task per available core
    pub fn new(env: TaskEnvironment, max_concurrency: usize) -> Self {
        Self {
            env,
            in_flight: Arc::new(InFlightSet::new(effective_parallelism(max_concurrency))),
        }
    }

    pub fn in_flight_task_ids(&self) -> Vec<i64> {
        self.in_flight.task_ids()
    }
}

impl TaskDispatcher for LocalTaskRunner {
    fn dispatch(&self, task_id: i64, on_complete: CompletionCallback) -> Result<RunAck, TaskRunnerError> {
        let entry_id = self.in_flight.try_reserve(task_id)?;
        let env = self.env.clone();
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let execution = tokio::spawn(async move { execute_task(&env, task_id).await.exit_code() });
            let exit_code = match execution.await {
                Ok(code) => code,
                Err(err) => {
                    error!(task_id, error = %err, "❌ Task execution panicked");
                    PANICKED_EXIT_CODE
                }
            };
            in_flight.release(entry_id);
            debug!(task_id, exit_code, "Local task resolved");
            on_complete(exit_code);
        });

        Ok(RunAck { task_id })
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn max_concurrency(&self) -> usize {
        self.in_flight.max_concurrency()
    }
}

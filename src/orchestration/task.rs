//! # Task
//!
//! A unit of work bound to one `job_tasks` row.
//!
//! ## Overview
//!
//! `Task::from_task_id` resolves the row's type identifier through
//! `job_task_types`, instantiates the registered [`TaskHandler`] and wraps it
//! with a [`TaskContext`] carrying the row, its arguments and the job linkage.
//!
//! ## Lifecycle
//!
//! ```text
//! waiting ──run() + finish()──▶ completed
//!    │
//!    └──────mark_as(Error)────▶ error
//! ```
//!
//! `finish()` is the only transition that touches other rows: it satisfies the
//! outgoing edges and recomputes the dependents' counters in one transaction.
//! `complete()` does the same and also advances the job's progress inside that
//! transaction; `execute_task` uses it so a task is never recorded as `error`
//! after its dependents were released.

use crate::constants::TaskStatus;
use crate::error::{OrchestrationError, Result};
use crate::logging::{log_error, log_task_operation};
use crate::models::{Job, JobTask, JobTaskType};
use crate::registry::Registry;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Implementation of one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Perform the work. Returning normally lets the caller `finish()` the task.
    async fn run(&self, task: &TaskContext) -> anyhow::Result<()>;
}

/// Shared handles every task needs
#[derive(Clone)]
pub struct TaskEnvironment {
    pool: SqlitePool,
    registry: Arc<Registry>,
    workspace_base: PathBuf,
    plan_workers: usize,
}

impl std::fmt::Debug for TaskEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnvironment")
            .field("registry", &self.registry)
            .field("workspace_base", &self.workspace_base)
            .field("plan_workers", &self.plan_workers)
            .finish()
    }
}

impl TaskEnvironment {
    pub fn new(pool: SqlitePool, registry: Arc<Registry>, workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            registry,
            workspace_base: workspace_base.into(),
            plan_workers: 0,
        }
    }

    /// Worker bound for in-process plans run by tasks; zero means core count
    pub fn with_plan_workers(mut self, plan_workers: usize) -> Self {
        self.plan_workers = plan_workers;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn workspace_base(&self) -> &Path {
        &self.workspace_base
    }

    pub fn plan_workers(&self) -> usize {
        self.plan_workers
    }
}

/// What a handler sees of its task row
pub struct TaskContext {
    env: TaskEnvironment,
    row: JobTask,
    identifier: String,
    job: OnceCell<Job>,
}

impl TaskContext {
    pub fn new(env: TaskEnvironment, row: JobTask, identifier: impl Into<String>) -> Self {
        Self {
            env,
            row,
            identifier: identifier.into(),
            job: OnceCell::new(),
        }
    }

    pub fn task_id(&self) -> i64 {
        self.row.task_id
    }

    pub fn job_id(&self) -> i64 {
        self.row.job_id
    }

    pub fn step(&self) -> i64 {
        self.row.step
    }

    /// Registry key of this task's type
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The row as loaded by `from_task_id`
    pub fn row(&self) -> &JobTask {
        &self.row
    }

    /// Decoded positional arguments
    pub fn args(&self) -> Result<Vec<Value>> {
        Ok(self.row.decoded_args()?)
    }

    /// The owning job, loaded on first use
    pub async fn job(&self) -> Result<&Job> {
        self.job
            .get_or_try_init(|| async {
                Job::find_by_id(&self.env.pool, self.row.job_id)
                    .await?
                    .ok_or_else(|| OrchestrationError::not_found("job", self.row.job_id))
            })
            .await
    }

    pub async fn project_id(&self) -> Result<Option<i64>> {
        Ok(self.job().await?.project_id)
    }

    pub async fn user_id(&self) -> Result<Option<i64>> {
        Ok(self.job().await?.user_id)
    }

    /// `<workspace_base>/<job_id>[/<sub>]`
    pub fn workspace_path(&self, sub: Option<&str>) -> PathBuf {
        workspace_path(&self.env.workspace_base, self.row.job_id, sub)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.env.pool
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.env.registry
    }

    pub fn environment(&self) -> &TaskEnvironment {
        &self.env
    }
}

/// Job workspace directory on the shared filesystem
pub fn workspace_path(workspace_base: &Path, job_id: i64, sub: Option<&str>) -> PathBuf {
    let root = workspace_base.join(job_id.to_string());
    match sub {
        Some(sub) => root.join(sub),
        None => root,
    }
}

/// A task row paired with its handler
pub struct Task {
    context: TaskContext,
    handler: Box<dyn TaskHandler>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.context.task_id())
            .field("job_id", &self.context.job_id())
            .field("identifier", &self.context.identifier)
            .finish()
    }
}

impl Task {
    /// Load a task row and instantiate its registered handler.
    ///
    /// Fails with `NotFound` when the row, its type id or the registration
    /// is missing.
    pub async fn from_task_id(env: &TaskEnvironment, task_id: i64) -> Result<Task> {
        let resolution = JobTaskType::resolve_for_task(&env.pool, task_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("job_task", task_id))?;
        let identifier = resolution
            .identifier
            .ok_or_else(|| OrchestrationError::not_found("job_task_type", resolution.type_id))?;

        let handler = env.registry.task(&identifier)?;
        let row = JobTask::find_by_id(&env.pool, task_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("job_task", task_id))?;

        debug!(task_id, job_id = row.job_id, identifier = %identifier, "Resolved task handler");

        Ok(Task {
            context: TaskContext::new(env.clone(), row, identifier),
            handler,
        })
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn task_id(&self) -> i64 {
        self.context.task_id()
    }

    /// Run the handler after re-checking eligibility against the store
    pub async fn run(&self) -> Result<()> {
        let task_id = self.task_id();
        let current = JobTask::find_by_id(self.context.pool(), task_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("job_task", task_id))?;

        if current.status != TaskStatus::Waiting {
            return Err(OrchestrationError::TaskNotEligible {
                task_id,
                reason: format!("status is {}", current.status),
            });
        }
        if current.dependency_counter != 0 {
            return Err(OrchestrationError::TaskNotEligible {
                task_id,
                reason: format!("{} unsatisfied dependencies", current.dependency_counter),
            });
        }

        self.handler
            .run(&self.context)
            .await
            .map_err(|err| OrchestrationError::TaskExecution {
                task_id,
                message: format!("{err:#}"),
            })
    }

    /// Mark completed and release dependents; returns the newly eligible ids
    pub async fn finish(&self, remark: &str) -> Result<Vec<i64>> {
        let released = JobTask::finish(self.context.pool(), self.task_id(), remark).await?;
        Ok(released)
    }

    /// `finish` plus one job progress unit, committed together.
    ///
    /// On error nothing is written, so the task is still `waiting` and its
    /// dependents are still blocked.
    pub async fn complete(&self, remark: &str) -> Result<Vec<i64>> {
        let mut tx = self.context.pool().begin().await?;
        let released = JobTask::finish_with(&mut *tx, self.task_id(), remark).await?;
        // job.end snaps progress to the total; the increment is clamped
        Job::add_progress(&mut *tx, self.context.job_id(), 1).await?;
        tx.commit().await?;
        Ok(released)
    }

    /// Set status and remark without cascading
    pub async fn mark_as(&self, status: TaskStatus, remark: Option<&str>) -> Result<()> {
        let task_id = self.task_id();
        if !JobTask::mark_as(self.context.pool(), task_id, status, remark).await? {
            return Err(OrchestrationError::not_found("job_task", task_id));
        }
        Ok(())
    }
}

/// Outcome of running one task to its terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExecution {
    Completed { task_id: i64, released: Vec<i64> },
    /// The task was recorded as `error`
    Failed { task_id: i64, error: String },
    /// The task was not runnable; its row was left untouched
    NotEligible { task_id: i64, reason: String },
}

impl TaskExecution {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Process exit code for the runner binary
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::Failed { .. } => 1,
            Self::NotEligible { .. } => 2,
        }
    }
}

/// Resolve, run and finish one task.
///
/// Any failure is recorded on the task row as status `error` with the error
/// as remark. Never panics; a failure to record the error is only logged.
pub async fn execute_task(env: &TaskEnvironment, task_id: i64) -> TaskExecution {
    match try_execute_task(env, task_id).await {
        Ok(released) => {
            log_task_operation(
                "execute",
                task_id,
                None,
                "completed",
                Some(&format!("released {} dependents", released.len())),
            );
            TaskExecution::Completed { task_id, released }
        }
        Err(OrchestrationError::TaskNotEligible { reason, .. }) => {
            warn!(task_id, reason = %reason, "⏭️ Task not eligible, leaving row untouched");
            TaskExecution::NotEligible { task_id, reason }
        }
        Err(err) => {
            let error = err.to_string();
            log_error("task", "execute", &error, Some(&format!("task_id={task_id}")));
            if let Err(mark_err) =
                JobTask::mark_as(env.pool(), task_id, TaskStatus::Error, Some(&error)).await
            {
                log_error(
                    "task",
                    "mark_error",
                    &mark_err.to_string(),
                    Some(&format!("task_id={task_id}")),
                );
            }
            TaskExecution::Failed { task_id, error }
        }
    }
}

async fn try_execute_task(env: &TaskEnvironment, task_id: i64) -> Result<Vec<i64>> {
    let task = Task::from_task_id(env, task_id).await?;
    let job_id = task.context().job_id();
    info!(task_id, job_id, identifier = %task.context().identifier(), "▶️ Running task");

    task.run().await?;
    task.complete("").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_path_layout() {
        let base = Path::new("/srv/jobs");
        assert_eq!(workspace_path(base, 42, None), PathBuf::from("/srv/jobs/42"));
        assert_eq!(
            workspace_path(base, 42, Some("recordings")),
            PathBuf::from("/srv/jobs/42/recordings")
        );
    }

    #[test]
    fn test_execution_exit_codes() {
        let done = TaskExecution::Completed { task_id: 1, released: vec![2] };
        assert!(done.is_success());
        assert_eq!(done.exit_code(), 0);
        assert_eq!(
            TaskExecution::Failed { task_id: 1, error: "boom".into() }.exit_code(),
            1
        );
        assert_eq!(
            TaskExecution::NotEligible { task_id: 1, reason: "status is completed".into() }.exit_code(),
            2
        );
    }
}

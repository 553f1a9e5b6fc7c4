//! # Job Planner
//!
//! Turns a job into a persisted task DAG.
//!
//! A [`JobPlanner`] receives a [`PlanningContext`] that owns the planning
//! transaction. Every primitive writes through that transaction, so a planner
//! that fails halfway leaves no rows behind.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use rfm_jobs::orchestration::planner::{JobPlanner, PlanningContext};
//! use serde_json::json;
//!
//! struct ClassificationPlanner;
//!
//! #[async_trait]
//! impl JobPlanner for ClassificationPlanner {
//!     async fn plan(&self, ctx: &mut PlanningContext) -> anyhow::Result<()> {
//!         let classify = ctx.task_type_id("classify.recording").await?;
//!         let prepare = ctx.add_prepare_workspace_task(1, &[], &["output"]).await?;
//!         let rows = vec![vec![json!(101)], vec![json!(102)]];
//!         let classified = ctx.add_tasks(2, classify, &[prepare], rows).await?;
//!         let sync = ctx.add_sync_task(3, &classified).await?;
//!         ctx.add_job_end_task(4, &[sync]).await?;
//!         Ok(())
//!     }
//! }
//! ```

use crate::constants::{task_types, TaskTypeId};
use crate::error::{OrchestrationError, Result};
use crate::models::{Job, JobTask, JobTaskDependency, JobTaskType, NewJobTask};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

/// Job-type specific DAG builder
#[async_trait]
pub trait JobPlanner: Send + Sync {
    async fn plan(&self, ctx: &mut PlanningContext) -> anyhow::Result<()>;
}

/// Planning transaction plus the job being planned
pub struct PlanningContext {
    job: Job,
    plan_task_id: i64,
    tx: Transaction<'static, Sqlite>,
    tasks_added: usize,
}

impl PlanningContext {
    /// Open the planning transaction for `job`
    pub async fn begin(pool: &SqlitePool, job: Job, plan_task_id: i64) -> Result<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            job,
            plan_task_id,
            tx,
            tasks_added: 0,
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> i64 {
        self.job.job_id
    }

    /// The `job.plan` task that is running this planner
    pub fn plan_task_id(&self) -> i64 {
        self.plan_task_id
    }

    /// Tasks inserted through this context so far
    pub fn tasks_added(&self) -> usize {
        self.tasks_added
    }

    /// The planning transaction, for planner-specific reads and writes
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Look up the numeric id of a registered task type
    pub async fn task_type_id(&mut self, identifier: &str) -> Result<TaskTypeId> {
        JobTaskType::find_by_identifier(&mut *self.tx, identifier)
            .await?
            .map(|task_type| task_type.id())
            .ok_or_else(|| OrchestrationError::not_found("job_task_type", identifier))
    }

    /// Insert one task that waits on `dependencies`
    pub async fn add_task(
        &mut self,
        step: i64,
        type_id: TaskTypeId,
        dependencies: &[i64],
        args: Vec<Value>,
    ) -> Result<i64> {
        self.ensure_tasks_exist(dependencies).await?;
        let task_id = JobTask::create(
            &mut self.tx,
            &NewJobTask {
                job_id: self.job.job_id,
                step,
                type_id,
                dependency_counter: dependencies.len() as i64,
                args,
            },
        )
        .await?;
        JobTaskDependency::create_many(&mut self.tx, &[task_id], dependencies).await?;
        self.tasks_added += 1;

        debug!(
            job_id = self.job.job_id,
            task_id,
            step,
            type_id = %type_id,
            dependencies = dependencies.len(),
            "Planned task"
        );
        Ok(task_id)
    }

    /// Insert one task per argument list, each waiting on all of `dependencies`.
    ///
    /// Returns the new ids in ascending order.
    pub async fn add_tasks(
        &mut self,
        step: i64,
        type_id: TaskTypeId,
        dependencies: &[i64],
        args_list: Vec<Vec<Value>>,
    ) -> Result<Vec<i64>> {
        if args_list.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_tasks_exist(dependencies).await?;
        let task_ids =
            JobTask::create_many(&mut self.tx, self.job.job_id, step, type_id, &args_list).await?;
        JobTaskDependency::create_many(&mut self.tx, &task_ids, dependencies).await?;
        self.tasks_added += task_ids.len();

        debug!(
            job_id = self.job.job_id,
            step,
            type_id = %type_id,
            count = task_ids.len(),
            dependencies = dependencies.len(),
            "Planned task fan-out"
        );
        Ok(task_ids)
    }

    /// Barrier task that completes once all `dependencies` have
    pub async fn add_sync_task(&mut self, step: i64, dependencies: &[i64]) -> Result<i64> {
        self.add_task(step, task_types::JOB_SYNC, dependencies, Vec::new())
            .await
    }

    /// Terminal task: removes the workspace and completes the job
    pub async fn add_job_end_task(&mut self, step: i64, dependencies: &[i64]) -> Result<i64> {
        self.add_task(step, task_types::JOB_END, dependencies, Vec::new())
            .await
    }

    /// Creates the job workspace plus `folders` inside it
    pub async fn add_prepare_workspace_task(
        &mut self,
        step: i64,
        dependencies: &[i64],
        folders: &[&str],
    ) -> Result<i64> {
        let args = folders.iter().map(|f| Value::from(*f)).collect();
        self.add_task(step, task_types::JOB_PREPARE_WORKSPACE, dependencies, args)
            .await
    }

    pub async fn add_task_dependency(&mut self, task_id: i64, dependency_id: i64) -> Result<()> {
        self.add_task_dependencies(&[task_id], &[dependency_id])
            .await
    }

    /// Make every task in `task_ids` wait on every task in `dependency_ids`.
    /// No-op when either list is empty.
    pub async fn add_task_dependencies(
        &mut self,
        task_ids: &[i64],
        dependency_ids: &[i64],
    ) -> Result<()> {
        if task_ids.is_empty() || dependency_ids.is_empty() {
            return Ok(());
        }
        if let Some(task_id) = task_ids.iter().find(|id| dependency_ids.contains(*id)) {
            return Err(OrchestrationError::Planning {
                job_id: self.job.job_id,
                message: format!("task {task_id} cannot depend on itself"),
            });
        }
        self.ensure_tasks_exist(task_ids).await?;
        self.ensure_tasks_exist(dependency_ids).await?;
        JobTaskDependency::create_many(&mut self.tx, task_ids, dependency_ids).await?;
        Ok(())
    }

    /// Remove this job's tasks above `step` and every edge touching them
    pub async fn delete_steps_higher_than(&mut self, step: i64) -> Result<u64> {
        let deleted = JobTask::delete_steps_higher_than(&mut self.tx, self.job.job_id, step).await?;
        debug!(job_id = self.job.job_id, step, deleted, "Deleted planned steps");
        Ok(deleted)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn ensure_tasks_exist(&mut self, task_ids: &[i64]) -> Result<()> {
        if task_ids.is_empty() {
            return Ok(());
        }
        let found = JobTask::existing_ids(&mut self.tx, task_ids).await?;
        match task_ids.iter().find(|id| found.binary_search(*id).is_err()) {
            Some(missing) => Err(OrchestrationError::not_found("job_task", missing)),
            None => Ok(()),
        }
    }
}

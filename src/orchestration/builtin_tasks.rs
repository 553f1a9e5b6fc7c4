//! Built-in task types every job graph may use.

use crate::constants::task_types;
use crate::logging::log_job_operation;
use crate::models::{Job, JobTask};
use crate::orchestration::planner::PlanningContext;
use crate::orchestration::task::{TaskContext, TaskHandler};
use crate::registry::Registry;
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path};
use tracing::{debug, info};

/// Register `job.plan`, `job.prepare_workspace`, `job.sync` and `job.end`
pub fn register_builtin_tasks(registry: &Registry) {
    registry.register_task(task_types::JOB_PLAN_IDENTIFIER, || Box::new(PlanJobTask));
    registry.register_task(task_types::JOB_PREPARE_WORKSPACE_IDENTIFIER, || {
        Box::new(PrepareWorkspaceTask)
    });
    registry.register_task(task_types::JOB_SYNC_IDENTIFIER, || Box::new(SyncTask));
    registry.register_task(task_types::JOB_END_IDENTIFIER, || Box::new(JobEndTask));
}

/// Delegates DAG construction to the planner registered for the job's type
#[derive(Debug, Default)]
pub struct PlanJobTask;

#[async_trait]
impl TaskHandler for PlanJobTask {
    async fn run(&self, task: &TaskContext) -> anyhow::Result<()> {
        let job = task.job().await?.clone();
        let job_id = job.job_id;
        let planner = task
            .registry()
            .planner(&job.job_type)
            .with_context(|| format!("cannot plan job {job_id} of type {}", job.job_type))?;

        let mut ctx = PlanningContext::begin(task.pool(), job, task.task_id()).await?;
        if let Err(err) = planner.plan(&mut ctx).await {
            ctx.rollback().await?;
            return Err(err.context(format!("planner for job {job_id} failed")));
        }
        let planned = ctx.tasks_added();
        ctx.commit().await?;

        let progress_steps = JobTask::count_for_job(task.pool(), job_id).await?;
        Job::prepare_run(task.pool(), job_id, progress_steps).await?;

        log_job_operation(
            "plan",
            job_id,
            "processing",
            Some(&format!("planned {planned} tasks")),
        );
        Ok(())
    }
}

/// `mkdir -p` of the job workspace and of each folder named in the args
#[derive(Debug, Default)]
pub struct PrepareWorkspaceTask;

#[async_trait]
impl TaskHandler for PrepareWorkspaceTask {
    async fn run(&self, task: &TaskContext) -> anyhow::Result<()> {
        let workspace = task.workspace_path(None);
        tokio::fs::create_dir_all(&workspace)
            .await
            .with_context(|| format!("creating workspace {}", workspace.display()))?;

        for arg in task.args()? {
            let Some(folder) = arg.as_str() else {
                bail!("workspace folder must be a string, got {arg}");
            };
            if !is_relative_inside(Path::new(folder)) {
                bail!("workspace folder {folder:?} escapes the job workspace");
            }
            let path = workspace.join(folder);
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("creating workspace folder {}", path.display()))?;
        }

        debug!(job_id = task.job_id(), workspace = %workspace.display(), "Workspace prepared");
        Ok(())
    }
}

/// Barrier; completing it is the whole point
#[derive(Debug, Default)]
pub struct SyncTask;

#[async_trait]
impl TaskHandler for SyncTask {
    async fn run(&self, _task: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Clears the job workspace and marks the job completed
#[derive(Debug, Default)]
pub struct JobEndTask;

#[async_trait]
impl TaskHandler for JobEndTask {
    async fn run(&self, task: &TaskContext) -> anyhow::Result<()> {
        let workspace = task.workspace_path(None);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("removing workspace {}", workspace.display()))
            }
        }

        Job::finish_run(task.pool(), task.job_id()).await?;
        info!(job_id = task.job_id(), "🏁 Job completed");
        log_job_operation("end", task.job_id(), "completed", None);
        Ok(())
    }
}

fn is_relative_inside(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

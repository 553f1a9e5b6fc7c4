//! # Plan Jobs
//!
//! Job lifecycle around a [`PlanRunner`]: the plan is wrapped with workspace
//! setup and teardown steps, the job row is reset with the plan's cost before
//! execution, and it is completed (or marked `error`) afterwards.

use super::plan_runner::{PlanExecution, PlanMonitor, PlanRunner, ProgressUpdate};
use super::{Plan, Step, StepInput};
use crate::constants::JobState;
use crate::error::{OrchestrationError, Result};
use crate::logging::{log_error, log_job_operation};
use crate::models::Job;
use crate::orchestration::task::{TaskContext, TaskHandler};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const SETUP_STEP_NAME: &str = "setup working environment";
pub const TEARDOWN_STEP_NAME: &str = "tear down working environment";

/// Writes plan progress to the `jobs` row and reads its cancellation flag
#[derive(Debug, Clone)]
pub struct JobProgressMonitor {
    pool: SqlitePool,
    job_id: i64,
}

impl JobProgressMonitor {
    pub fn new(pool: SqlitePool, job_id: i64) -> Self {
        Self { pool, job_id }
    }
}

#[async_trait]
impl PlanMonitor for JobProgressMonitor {
    async fn mark_progress(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        match update {
            ProgressUpdate::Absolute(progress) => {
                Job::update_progress(&self.pool, self.job_id, to_i64(progress)).await?
            }
            ProgressUpdate::Relative(delta) => {
                Job::add_progress(&self.pool, self.job_id, to_i64(delta)).await?
            }
        }
        Ok(())
    }

    async fn is_canceled(&self) -> anyhow::Result<bool> {
        Ok(Job::check_cancel_status(&self.pool, self.job_id).await?)
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Runs a plan on behalf of one job row
#[derive(Debug, Clone)]
pub struct PlanJob {
    pool: SqlitePool,
    job_id: i64,
    workspace_base: PathBuf,
    num_workers: usize,
}

impl PlanJob {
    pub fn new(pool: SqlitePool, job_id: i64, workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            job_id,
            workspace_base: workspace_base.into(),
            num_workers: 0,
        }
    }

    /// Zero means one worker per core
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// `<workspace_base>/job_<job_id>`
    pub fn working_folder(&self) -> PathBuf {
        self.workspace_base.join(format!("job_{}", self.job_id))
    }

    /// Wrap `plan` with the workspace steps and compute its cost
    pub fn plan_run(&self, plan: &mut Plan) -> u64 {
        let folder = self.working_folder();
        plan.prepend([Step::new(SETUP_STEP_NAME, move |_| {
            setup_working_folder(&folder)?;
            Ok(Value::Null)
        })]);

        let folder = self.working_folder();
        plan.append([Step::new(TEARDOWN_STEP_NAME, move |call| {
            remove_working_folder(&folder)?;
            Ok(call.inputs.values().next().cloned().unwrap_or(Value::Null))
        })
        .input(StepInput::Relative(-1))]);

        plan.compute_plan_cost()
    }

    /// Run `plan` to completion, cancellation or failure.
    ///
    /// A failure marks the job `error` with the failure as remarks and is
    /// returned to the caller.
    pub async fn run(&self, mut plan: Plan) -> Result<PlanExecution> {
        let cost = self.plan_run(&mut plan);
        if !Job::prepare_run(&self.pool, self.job_id, to_i64(cost)).await? {
            return Err(OrchestrationError::not_found("job", self.job_id));
        }
        log_job_operation("prepare_run", self.job_id, "processing", Some(&format!("cost {cost}")));

        let monitor = Arc::new(JobProgressMonitor::new(self.pool.clone(), self.job_id));
        let runner = PlanRunner::new(monitor).with_workers(self.num_workers);

        match runner.execute(&mut plan).await {
            Ok(execution) if execution.canceled => {
                warn!(job_id = self.job_id, steps_run = execution.steps_run, "🛑 Job canceled during plan");
                log_job_operation("run", self.job_id, "canceled", None);
                Ok(execution)
            }
            Ok(execution) => {
                Job::finish_run(&self.pool, self.job_id).await?;
                info!(job_id = self.job_id, "✅ Job plan finished");
                log_job_operation("finish_run", self.job_id, "completed", None);
                Ok(execution)
            }
            Err(err) => {
                let remarks = err.to_string();
                log_error("plan_job", "run", &remarks, Some(&format!("job_id={}", self.job_id)));
                Job::mark_state(&self.pool, self.job_id, JobState::Error, Some(&remarks)).await?;
                Err(err.into())
            }
        }
    }
}

fn setup_working_folder(folder: &Path) -> anyhow::Result<()> {
    remove_working_folder(folder)?;
    std::fs::create_dir_all(folder)
        .with_context(|| format!("creating working folder {}", folder.display()))
}

fn remove_working_folder(folder: &Path) -> anyhow::Result<()> {
    match std::fs::remove_dir_all(folder) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing working folder {}", folder.display())),
    }
}

/// Builds the plan a [`PlanTask`] runs for its job
#[async_trait]
pub trait PlanBuilder: Send + Sync {
    async fn build_plan(&self, task: &TaskContext) -> anyhow::Result<Plan>;
}

/// Task handler that runs a whole job as one in-process plan
pub struct PlanTask<B> {
    builder: B,
    num_workers: usize,
}

impl<B: PlanBuilder> PlanTask<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            num_workers: 0,
        }
    }

    /// Zero defers to the environment's `plan_workers`
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }
}

fn plan_workers(own: usize, environment: usize) -> usize {
    if own > 0 {
        own
    } else {
        environment
    }
}

#[async_trait]
impl<B: PlanBuilder> TaskHandler for PlanTask<B> {
    async fn run(&self, task: &TaskContext) -> anyhow::Result<()> {
        let plan = self.builder.build_plan(task).await?;
        let job = PlanJob::new(
            task.pool().clone(),
            task.job_id(),
            task.environment().workspace_base(),
        )
        .with_workers(plan_workers(self.num_workers, task.environment().plan_workers()));

        let execution = job.run(plan).await?;
        info!(
            task_id = task.task_id(),
            job_id = task.job_id(),
            canceled = execution.canceled,
            steps_run = execution.steps_run,
            "Plan task finished"
        );
        Ok(())
    }
}

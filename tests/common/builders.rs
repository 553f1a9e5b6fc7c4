use async_trait::async_trait;
use rfm_jobs::constants::TaskTypeId;
use rfm_jobs::models::{Job, JobTask, JobTaskType, NewJob};
use rfm_jobs::orchestration::{JobPlanner, PlanningContext, TaskContext, TaskHandler};
use rfm_jobs::registry::Registry;
use serde_json::Value;
use sqlx::SqlitePool;

pub const OK_TASK: TaskTypeId = TaskTypeId(100);
pub const OK_TASK_IDENTIFIER: &str = "test.ok";
pub const FAILING_TASK: TaskTypeId = TaskTypeId(101);
pub const FAILING_TASK_IDENTIFIER: &str = "test.fail";
pub const SLOW_TASK: TaskTypeId = TaskTypeId(103);
pub const SLOW_TASK_IDENTIFIER: &str = "test.slow";

/// Succeeds without side effects
pub struct OkTask;

#[async_trait]
impl TaskHandler for OkTask {
    async fn run(&self, _task: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Always fails with a recognizable message
pub struct FailingTask;

#[async_trait]
impl TaskHandler for FailingTask {
    async fn run(&self, task: &TaskContext) -> anyhow::Result<()> {
        anyhow::bail!("simulated failure in task {}", task.task_id())
    }
}

/// Holds its dispatcher slot long enough for other jobs to poll
pub struct SlowTask;

#[async_trait]
impl TaskHandler for SlowTask {
    async fn run(&self, _task: &TaskContext) -> anyhow::Result<()> {
        tokio::time::sleep(std::time::Duration::from_millis(750)).await;
        Ok(())
    }
}

pub async fn create_job(pool: &SqlitePool, job_type: &str) -> Job {
    Job::create(pool, &NewJob::new(job_type))
        .await
        .expect("job should be created")
}

/// Catalog rows for the test task types
pub async fn register_test_task_types(pool: &SqlitePool) {
    JobTaskType::upsert(pool, OK_TASK, OK_TASK_IDENTIFIER).await.unwrap();
    JobTaskType::upsert(pool, FAILING_TASK, FAILING_TASK_IDENTIFIER).await.unwrap();
    JobTaskType::upsert(pool, SLOW_TASK, SLOW_TASK_IDENTIFIER).await.unwrap();
}

/// Built-ins plus the test task handlers
pub fn test_registry() -> Registry {
    let registry = Registry::with_builtin_tasks();
    registry.register_task(OK_TASK_IDENTIFIER, || Box::new(OkTask));
    registry.register_task(FAILING_TASK_IDENTIFIER, || Box::new(FailingTask));
    registry.register_task(SLOW_TASK_IDENTIFIER, || Box::new(SlowTask));
    registry
}

/// Insert one task through a planning transaction
pub async fn add_task(
    pool: &SqlitePool,
    job: &Job,
    step: i64,
    type_id: TaskTypeId,
    dependencies: &[i64],
) -> i64 {
    let mut ctx = PlanningContext::begin(pool, job.clone(), 0).await.unwrap();
    let task_id = ctx
        .add_task(step, type_id, dependencies, Vec::<Value>::new())
        .await
        .unwrap();
    ctx.commit().await.unwrap();
    task_id
}

pub async fn task(pool: &SqlitePool, task_id: i64) -> JobTask {
    JobTask::find_by_id(pool, task_id)
        .await
        .unwrap()
        .expect("task should exist")
}

pub async fn counter(pool: &SqlitePool, task_id: i64) -> i64 {
    task(pool, task_id).await.dependency_counter
}

pub async fn job(pool: &SqlitePool, job_id: i64) -> Job {
    Job::find_by_id(pool, job_id)
        .await
        .unwrap()
        .expect("job should exist")
}

/// A, B, C(A, B), then job.end(C)
pub struct DiamondPlanner {
    pub task_type: TaskTypeId,
}

#[async_trait]
impl JobPlanner for DiamondPlanner {
    async fn plan(&self, ctx: &mut PlanningContext) -> anyhow::Result<()> {
        let a = ctx.add_task(1, self.task_type, &[], Vec::new()).await?;
        let b = ctx.add_task(1, self.task_type, &[], Vec::new()).await?;
        let c = ctx.add_task(2, self.task_type, &[a, b], Vec::new()).await?;
        ctx.add_job_end_task(3, &[c]).await?;
        Ok(())
    }
}

//! In-process plans: cost watermarks, parallel steps, inputs and cancellation.

mod common;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use rfm_jobs::constants::JobState;
use rfm_jobs::plan::{
    Plan, PlanError, PlanJob, PlanMonitor, PlanRunner, ProgressUpdate, Step, StepInput,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct RecordingMonitor {
    updates: Mutex<Vec<ProgressUpdate>>,
    cancel_after: Option<usize>,
    polls: AtomicUsize,
}

impl RecordingMonitor {
    fn canceling_after(polls: usize) -> Self {
        Self {
            cancel_after: Some(polls),
            ..Self::default()
        }
    }

    fn absolute(&self) -> Vec<u64> {
        self.updates
            .lock()
            .iter()
            .filter_map(|update| match update {
                ProgressUpdate::Absolute(value) => Some(*value),
                ProgressUpdate::Relative(_) => None,
            })
            .collect()
    }

    /// Progress as a monitor applying every update in order would see it
    fn running_progress(&self) -> Vec<u64> {
        let mut progress = 0;
        self.updates
            .lock()
            .iter()
            .map(|update| {
                match update {
                    ProgressUpdate::Absolute(value) => progress = *value,
                    ProgressUpdate::Relative(delta) => progress += delta,
                }
                progress
            })
            .collect()
    }
}

#[async_trait]
impl PlanMonitor for RecordingMonitor {
    async fn mark_progress(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        self.updates.lock().push(update);
        Ok(())
    }

    async fn is_canceled(&self) -> anyhow::Result<bool> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.cancel_after.is_some_and(|limit| polls >= limit))
    }
}

fn noop(name: &str) -> Step {
    Step::new(name, |_| Ok(Value::Null))
}

#[tokio::test]
async fn test_watermarks_follow_cost_table() {
    let monitor = Arc::new(RecordingMonitor::default());
    let runner = PlanRunner::new(monitor.clone()).with_workers(2);
    let mut plan = Plan::new(vec![
        noop("one"),
        noop("fan-out").parallel(vec![json!(1), json!(2), json!(3), json!(4)]),
        noop("last"),
    ]);

    let execution = runner.execute(&mut plan).await.unwrap();
    assert!(!execution.canceled);
    assert_eq!(execution.steps_run, 3);
    assert_eq!(monitor.absolute(), vec![1, 5, 6]);
    assert_eq!(plan.cost(), 6);

    let progress = monitor.running_progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&6));
}

#[tokio::test]
async fn test_parallel_results_keep_item_order() {
    let monitor = Arc::new(RecordingMonitor::default());
    let runner = PlanRunner::new(monitor).with_workers(4);
    let mut plan = Plan::new(vec![Step::new("square", |call| {
        let value = call.item_value().and_then(Value::as_u64).unwrap_or(0);
        // Later items finish first
        std::thread::sleep(std::time::Duration::from_millis(40 - value * 5));
        Ok(json!(value * value))
    })
    .parallel((1..=6).map(|i| json!(i)).collect())]);

    let execution = runner.execute(&mut plan).await.unwrap();
    assert_eq!(execution.result, json!([1, 4, 9, 16, 25, 36]));
    assert_eq!(plan.step("square").unwrap().result(), Some(&execution.result));
}

#[tokio::test]
async fn test_parallel_step_respects_worker_bound() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));

    let runner = PlanRunner::new(Arc::new(RecordingMonitor::default())).with_workers(2);
    assert_eq!(runner.num_workers(), 2);
    let mut plan = Plan::new(vec![Step::new("bounded", move |_| {
        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(30));
        r.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    })
    .parallel(vec![Value::Null; 8])]);

    runner.execute(&mut plan).await.unwrap();
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_inputs_resolve_relative_named_and_literal() {
    let runner = PlanRunner::new(Arc::new(RecordingMonitor::default()));
    let mut plan = Plan::new(vec![
        Step::new("list", |_| Ok(json!(["a.wav", "b.wav"]))),
        Step::new("count", |call| {
            let listed = call.input("list").and_then(Value::as_array).map_or(0, Vec::len);
            Ok(json!(listed))
        })
        .input(StepInput::Relative(-1)),
        Step::new("report", |call| {
            Ok(json!({
                "files": call.input("list").cloned(),
                "count": call.input("count").cloned(),
                "site": call.input("site").cloned(),
            }))
        })
        .input(StepInput::Named("list".into()))
        .input(StepInput::Relative(-1))
        .input(StepInput::Value {
            key: "site".into(),
            value: json!("PR-01"),
        }),
    ]);

    let execution = runner.execute(&mut plan).await.unwrap();
    assert_eq!(
        execution.result,
        json!({"files": ["a.wav", "b.wav"], "count": 2, "site": "PR-01"})
    );
}

#[tokio::test]
async fn test_forward_reference_is_unresolved() {
    let runner = PlanRunner::new(Arc::new(RecordingMonitor::default()));
    let mut plan = Plan::new(vec![
        noop("first").input(StepInput::Relative(1)),
        noop("second"),
    ]);

    let err = runner.execute(&mut plan).await.unwrap_err();
    assert!(matches!(err, PlanError::UnresolvedInput { ref step, .. } if step == "first"));

    let plan = Plan::new(vec![noop("only").input(StepInput::Named("missing".into()))]);
    assert!(PlanRunner::compute_step_inputs(&plan, 0).is_err());
}

#[tokio::test]
async fn test_cancellation_stops_after_current_step() {
    let monitor = Arc::new(RecordingMonitor::canceling_after(2));
    let ran_third = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran_third);

    let runner = PlanRunner::new(monitor.clone());
    let mut plan = Plan::new(vec![
        noop("one"),
        noop("two"),
        Step::new("three", move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }),
    ]);

    let execution = runner.execute(&mut plan).await.unwrap();
    assert!(execution.canceled);
    assert_eq!(execution.steps_run, 2);
    assert!(!ran_third.load(Ordering::SeqCst));
    assert_eq!(monitor.absolute(), vec![1, 2]);
}

#[tokio::test]
async fn test_failing_item_fails_the_plan() {
    let runner = PlanRunner::new(Arc::new(RecordingMonitor::default())).with_workers(2);
    let mut plan = Plan::new(vec![Step::new("decode", |call| {
        match call.item.as_ref().map(|item| item.index) {
            Some(2) => anyhow::bail!("corrupt header"),
            _ => Ok(Value::Null),
        }
    })
    .parallel(vec![Value::Null; 4])]);

    let err = runner.execute(&mut plan).await.unwrap_err();
    match err {
        PlanError::StepFailed { step, item, message } => {
            assert_eq!(step, "decode");
            assert_eq!(item, Some(2));
            assert!(message.contains("corrupt header"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_step_is_reported() {
    let runner = PlanRunner::new(Arc::new(RecordingMonitor::default()));
    let mut plan = Plan::new(vec![Step::new("explode", |_| -> anyhow::Result<Value> {
        panic!("worker blew up")
    })]);

    let err = runner.execute(&mut plan).await.unwrap_err();
    assert!(matches!(err, PlanError::WorkerPanicked { ref step, .. } if step == "explode"));
}

#[tokio::test]
async fn test_plan_job_completes_job_and_cleans_folder() {
    let pool = test_pool().await;
    let workspace = tempfile::tempdir().unwrap();
    let job = create_job(&pool, "test.plan_job").await;
    let plan_job = PlanJob::new(pool.clone(), job.job_id, workspace.path()).with_workers(2);
    let folder = plan_job.working_folder();

    let seen = folder.clone();
    let plan = Plan::new(vec![
        Step::new("write", move |_| {
            std::fs::write(seen.join("out.txt"), b"ok")?;
            Ok(json!("written"))
        }),
        noop("fan-out").parallel(vec![Value::Null; 3]).cost(2),
    ]);

    let execution = plan_job.run(plan).await.unwrap();
    assert!(!execution.canceled);
    // setup + write + 3 items * 2 + teardown
    let done = common::job(&pool, job.job_id).await;
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.progress_steps, 9);
    assert_eq!(done.progress, 9);
    assert!(!folder.exists());
}

#[tokio::test]
async fn test_plan_job_failure_marks_job_error() {
    let pool = test_pool().await;
    let workspace = tempfile::tempdir().unwrap();
    let job = create_job(&pool, "test.plan_job_failure").await;
    let plan_job = PlanJob::new(pool.clone(), job.job_id, workspace.path());

    let plan = Plan::new(vec![Step::new("classify", |_| -> anyhow::Result<Value> {
        anyhow::bail!("model missing")
    })]);

    assert!(plan_job.run(plan).await.is_err());
    let failed = common::job(&pool, job.job_id).await;
    assert_eq!(failed.state, JobState::Error);
    assert!(failed.remarks.unwrap().contains("model missing"));
}

#[tokio::test]
async fn test_plan_job_observes_cancel_request() {
    let pool = test_pool().await;
    let workspace = tempfile::tempdir().unwrap();
    let job = create_job(&pool, "test.plan_job_cancel").await;
    let plan_job = PlanJob::new(pool.clone(), job.job_id, workspace.path());

    // Observed at the first cancellation poll, right after setup
    rfm_jobs::models::Job::request_cancel(&pool, job.job_id).await.unwrap();
    let plan = Plan::new(vec![noop("never runs")]);

    let execution = plan_job.run(plan).await.unwrap();
    assert!(execution.canceled);
    assert_eq!(execution.steps_run, 1);
    assert_eq!(common::job(&pool, job.job_id).await.state, JobState::Canceled);

    let missing = PlanJob::new(pool.clone(), 4242, workspace.path());
    assert!(missing.run(Plan::new(vec![noop("x")])).await.is_err());
}

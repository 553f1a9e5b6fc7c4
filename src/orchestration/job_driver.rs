//! # Job Driver
//!
//! Dispatch loop that carries one job from its `job.plan` root task to a
//! terminal state.
//!
//! ## Overview
//!
//! Every tick the driver:
//!
//! 1. Collects exit codes reported by the dispatcher. A non-zero exit whose task
//!    row is still `waiting` is recorded as `error`.
//! 2. Finishes the drive for a job already `completed` or `error` once none of
//!    its tasks are in flight, even if cancellation was requested late. Otherwise
//!    observes the job's cancellation flag and stops dispatching once it is set.
//! 3. Dispatches eligible tasks that are not already in flight until the
//!    dispatcher reports `AtMaximumConcurrency`.
//! 4. Counts idle polls (nothing eligible, nothing in flight, tasks left). Eligible
//!    tasks refused with `AtMaximumConcurrency` reset the count. After
//!    `stall_poll_threshold` consecutive idle polls the job is marked `error`.
//!
//! Failed tasks do not cascade; their dependents stay blocked, which is what
//! the stall detection surfaces.

use crate::config::DriverConfig;
use crate::constants::{task_types, JobState, TaskStatus, PLAN_TASK_STEP};
use crate::error::{OrchestrationError, Result};
use crate::execution::{TaskDispatcher, TaskRunnerError};
use crate::logging::{log_error, log_job_operation, log_task_operation};
use crate::models::{Job, JobTask, NewJobTask};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// How a driven job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    Completed,
    Canceled,
    /// Marked `error` by something other than the driver, e.g. a plan failure
    Failed { remarks: Option<String> },
    /// No progress possible; `failed_tasks` are the tasks in `error`
    Stalled { failed_tasks: Vec<i64> },
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStatus {
    Running { dispatched: usize, in_flight: usize },
    Finished(DriverOutcome),
}

#[derive(Debug, Clone, Copy)]
struct Completion {
    job_id: i64,
    task_id: i64,
    exit_code: i32,
}

/// Polls the task graph store and feeds eligible tasks to a dispatcher
pub struct JobDriver {
    pool: SqlitePool,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: DriverConfig,
    /// task_id -> job_id of every dispatched task whose exit is not yet processed
    in_flight: Mutex<HashMap<i64, i64>>,
    completions: Arc<Mutex<Vec<Completion>>>,
    completion_signal: Arc<Notify>,
    idle_polls: Mutex<HashMap<i64, u32>>,
}

impl std::fmt::Debug for JobDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDriver")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl JobDriver {
    pub fn new(pool: SqlitePool, dispatcher: Arc<dyn TaskDispatcher>, config: DriverConfig) -> Self {
        Self {
            pool,
            dispatcher,
            config,
            in_flight: Mutex::new(HashMap::new()),
            completions: Arc::new(Mutex::new(Vec::new())),
            completion_signal: Arc::new(Notify::new()),
            idle_polls: Mutex::new(HashMap::new()),
        }
    }

    /// Insert the `job.plan` root task unless the job already has tasks.
    ///
    /// Returns the new task id, if one was created.
    pub async fn start(&self, job_id: i64) -> Result<Option<i64>> {
        if Job::find_by_id(&self.pool, job_id).await?.is_none() {
            return Err(OrchestrationError::not_found("job", job_id));
        }
        if JobTask::count_for_job(&self.pool, job_id).await? > 0 {
            debug!(job_id, "Job already planned or planning");
            return Ok(None);
        }

        let mut conn = self.pool.acquire().await?;
        let task_id = JobTask::create(
            &mut conn,
            &NewJobTask {
                job_id,
                step: PLAN_TASK_STEP,
                type_id: task_types::JOB_PLAN,
                dependency_counter: 0,
                args: Vec::new(),
            },
        )
        .await?;

        log_task_operation("create_plan_task", task_id, Some(job_id), "waiting", None);
        Ok(Some(task_id))
    }

    /// Drive `job_id` until it completes, is canceled, fails or stalls
    pub async fn run_job(&self, job_id: i64) -> Result<DriverOutcome> {
        self.start(job_id).await?;
        info!(job_id, max_concurrency = self.dispatcher.max_concurrency(), "🚗 Driving job");

        loop {
            if let TickStatus::Finished(outcome) = self.tick(job_id).await? {
                info!(job_id, outcome = ?outcome, "🏁 Job driver finished");
                return Ok(outcome);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = self.completion_signal.notified() => {}
            }
        }
    }

    /// One dispatch round
    pub async fn tick(&self, job_id: i64) -> Result<TickStatus> {
        self.process_completions().await?;

        let Some(job) = Job::find_by_id(&self.pool, job_id).await? else {
            // A deleted job counts as canceled
            log_job_operation("drive", job_id, "canceled", Some("job row removed"));
            return Ok(self.finish(job_id, DriverOutcome::Canceled));
        };

        // Terminal states win over a late cancel request
        if matches!(job.state, JobState::Completed | JobState::Error) {
            // job.end completes the job before its own runner has exited
            let in_flight = self.in_flight_for(job_id);
            if in_flight > 0 {
                return Ok(TickStatus::Running {
                    dispatched: 0,
                    in_flight,
                });
            }
            let outcome = match job.state {
                JobState::Completed => DriverOutcome::Completed,
                _ => DriverOutcome::Failed { remarks: job.remarks },
            };
            return Ok(self.finish(job_id, outcome));
        }

        if Job::check_cancel_status(&self.pool, job_id).await? {
            log_job_operation("drive", job_id, "canceled", None);
            return Ok(self.finish(job_id, DriverOutcome::Canceled));
        }

        let summary = JobTask::status_summary(&self.pool, job_id).await?;
        if summary.all_completed() {
            // Graphs without a job.end task complete here
            Job::finish_run(&self.pool, job_id).await?;
            log_job_operation("drive", job_id, "completed", Some("all tasks completed"));
            return Ok(self.finish(job_id, DriverOutcome::Completed));
        }

        let dispatched = self.dispatch_eligible(job_id).await?;
        let in_flight = self.in_flight_for(job_id);

        // Eligible tasks held back by a full dispatcher are not a stall
        if summary.eligible == 0 && dispatched == 0 && in_flight == 0 {
            let idle = {
                let mut idle_polls = self.idle_polls.lock();
                let idle = idle_polls.entry(job_id).or_insert(0);
                *idle += 1;
                *idle
            };
            debug!(job_id, idle, threshold = self.config.stall_poll_threshold, "Idle poll");
            if idle >= self.config.stall_poll_threshold {
                return self.mark_stalled(job_id).await;
            }
        } else {
            self.idle_polls.lock().insert(job_id, 0);
        }

        Ok(TickStatus::Running {
            dispatched,
            in_flight,
        })
    }

    /// Tasks of `job_id` dispatched and not yet resolved
    pub fn in_flight_for(&self, job_id: i64) -> usize {
        self.in_flight
            .lock()
            .values()
            .filter(|owner| **owner == job_id)
            .count()
    }

    async fn dispatch_eligible(&self, job_id: i64) -> Result<usize> {
        let eligible = JobTask::find_eligible(&self.pool, job_id).await?;
        let mut dispatched = 0;

        for task in eligible {
            let task_id = task.task_id;
            if self.in_flight.lock().contains_key(&task_id) {
                continue;
            }

            let completions = Arc::clone(&self.completions);
            let signal = Arc::clone(&self.completion_signal);
            let on_complete = Box::new(move |exit_code: i32| {
                completions.lock().push(Completion {
                    job_id,
                    task_id,
                    exit_code,
                });
                signal.notify_one();
            });

            // Registered before dispatch so a fast exit cannot be processed first
            self.in_flight.lock().insert(task_id, job_id);
            match self.dispatcher.dispatch(task_id, on_complete) {
                Ok(_) => {
                    dispatched += 1;
                    log_task_operation("dispatch", task_id, Some(job_id), "waiting", None);
                }
                Err(TaskRunnerError::AtMaximumConcurrency {
                    max_concurrency,
                    in_flight,
                }) => {
                    self.in_flight.lock().remove(&task_id);
                    debug!(job_id, max_concurrency, in_flight, "At maximum concurrency, backing off");
                    break;
                }
                Err(err @ TaskRunnerError::Launch { .. }) => {
                    self.in_flight.lock().remove(&task_id);
                    let remark = err.to_string();
                    log_error("job_driver", "dispatch", &remark, Some(&format!("task_id={task_id}")));
                    JobTask::mark_as(&self.pool, task_id, TaskStatus::Error, Some(&remark)).await?;
                }
            }
        }
        Ok(dispatched)
    }

    async fn process_completions(&self) -> Result<()> {
        let completions: Vec<Completion> = std::mem::take(&mut *self.completions.lock());

        for completion in completions {
            self.in_flight.lock().remove(&completion.task_id);
            if completion.exit_code == 0 {
                continue;
            }

            let Some(task) = JobTask::find_by_id(&self.pool, completion.task_id).await? else {
                continue;
            };
            if task.status != TaskStatus::Waiting {
                continue;
            }

            let remark = format!("runner exited with code {}", completion.exit_code);
            warn!(
                job_id = completion.job_id,
                task_id = completion.task_id,
                exit_code = completion.exit_code,
                "❌ Task runner failed without recording an outcome"
            );
            JobTask::mark_as(&self.pool, completion.task_id, TaskStatus::Error, Some(&remark)).await?;
        }
        Ok(())
    }

    async fn mark_stalled(&self, job_id: i64) -> Result<TickStatus> {
        let failed_tasks: Vec<i64> = JobTask::find_by_status(&self.pool, job_id, TaskStatus::Error)
            .await?
            .into_iter()
            .map(|task| task.task_id)
            .collect();

        let remarks = if failed_tasks.is_empty() {
            "job stalled: remaining tasks can never become eligible".to_string()
        } else {
            format!("job stalled: failed tasks {failed_tasks:?} block their dependents")
        };
        Job::mark_state(&self.pool, job_id, JobState::Error, Some(&remarks)).await?;
        log_job_operation("drive", job_id, "error", Some(&remarks));

        Ok(self.finish(job_id, DriverOutcome::Stalled { failed_tasks }))
    }

    fn finish(&self, job_id: i64, outcome: DriverOutcome) -> TickStatus {
        self.idle_polls.lock().remove(&job_id);
        TickStatus::Finished(outcome)
    }
}

use super::{Plan, PlanError, StepCall, StepInput, StepInputs, StepItem};
use crate::config::effective_parallelism;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Progress report sent to a [`PlanMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Set progress to this watermark
    Absolute(u64),
    /// Add this many cost units
    Relative(u64),
}

/// Receives progress and answers cancellation polls
#[async_trait]
pub trait PlanMonitor: Send + Sync {
    async fn mark_progress(&self, update: ProgressUpdate) -> anyhow::Result<()>;

    async fn is_canceled(&self) -> anyhow::Result<bool>;
}

/// Outcome of `PlanRunner::execute`
#[derive(Debug, Clone, PartialEq)]
pub struct PlanExecution {
    /// Result of the last step that ran
    pub result: Value,
    pub canceled: bool,
    pub steps_run: usize,
}

/// Runs a plan's steps in order on the blocking thread pool
pub struct PlanRunner {
    monitor: Arc<dyn PlanMonitor>,
    num_workers: usize,
}

impl std::fmt::Debug for PlanRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRunner")
            .field("num_workers", &self.num_workers)
            .finish()
    }
}

impl PlanRunner {
    pub fn new(monitor: Arc<dyn PlanMonitor>) -> Self {
        Self {
            monitor,
            num_workers: effective_parallelism(0),
        }
    }

    /// Bound on concurrently running items of a parallel step; zero means core count
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = effective_parallelism(num_workers);
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run every step in order, stopping early when the monitor reports
    /// cancellation after a step.
    pub async fn execute(&self, plan: &mut Plan) -> Result<PlanExecution, PlanError> {
        let total_cost = plan.compute_plan_cost();
        info!(steps = plan.len(), total_cost, "📋 Executing plan");

        let mut last_result = Value::Null;
        for index in 0..plan.len() {
            let inputs = Arc::new(Self::compute_step_inputs(plan, index)?);
            let step = &plan.steps()[index];
            debug!(step = %step.name(), index, parallel = step.is_parallelizable(), "Running plan step");

            let result = if step.is_parallelizable() {
                self.run_parallel_step(plan, index, inputs).await?
            } else {
                self.run_step(plan, index, inputs).await?
            };

            let Some(step) = plan.step_mut(index) else {
                break;
            };
            step.set_result(result.clone());
            last_result = result;
            let watermark = step.progress();

            self.monitor
                .mark_progress(ProgressUpdate::Absolute(watermark))
                .await
                .map_err(monitor_error)?;

            if self.monitor.is_canceled().await.map_err(monitor_error)? {
                warn!(after_step = index, "🛑 Plan canceled");
                return Ok(PlanExecution {
                    result: last_result,
                    canceled: true,
                    steps_run: index + 1,
                });
            }
        }

        info!(total_cost, "✅ Plan completed");
        Ok(PlanExecution {
            result: last_result,
            canceled: false,
            steps_run: plan.len(),
        })
    }

    /// Resolve the inputs of the step at `index` against earlier results
    pub fn compute_step_inputs(plan: &Plan, index: usize) -> Result<StepInputs, PlanError> {
        let steps = plan.steps();
        let Some(step) = steps.get(index) else {
            return Ok(StepInputs::new());
        };
        let unresolved = |reference: String| PlanError::UnresolvedInput {
            step: step.name().to_string(),
            reference,
        };

        let mut inputs = StepInputs::new();
        for input in step.inputs() {
            match input {
                StepInput::Relative(offset) => {
                    let target = index
                        .checked_add_signed(*offset)
                        .filter(|target| *target < index)
                        .ok_or_else(|| unresolved(format!("relative offset {offset}")))?;
                    let referenced = &steps[target];
                    let result = referenced
                        .result()
                        .ok_or_else(|| unresolved(format!("relative offset {offset}")))?;
                    inputs.insert(referenced.name().to_string(), result.clone());
                }
                StepInput::Named(name) => {
                    let result = steps[..index]
                        .iter()
                        .rev()
                        .find(|earlier| earlier.name() == name)
                        .and_then(|earlier| earlier.result())
                        .ok_or_else(|| unresolved(format!("step '{name}'")))?;
                    inputs.insert(name.clone(), result.clone());
                }
                StepInput::Value { key, value } => {
                    inputs.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(inputs)
    }

    async fn run_step(&self, plan: &Plan, index: usize, inputs: Arc<StepInputs>) -> Result<Value, PlanError> {
        let step = &plan.steps()[index];
        let name = step.name().to_string();
        let work = step.work();
        let call = StepCall {
            step: name.clone(),
            cost: step.cost_per_item(),
            item: None,
            inputs,
        };

        match tokio::task::spawn_blocking(move || work(call)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(PlanError::StepFailed {
                step: name,
                item: None,
                message: format!("{err:#}"),
            }),
            Err(join_error) => Err(panicked(name, join_error)),
        }
    }

    async fn run_parallel_step(
        &self,
        plan: &Plan,
        index: usize,
        inputs: Arc<StepInputs>,
    ) -> Result<Value, PlanError> {
        let step = &plan.steps()[index];
        let name = step.name().to_string();
        let cost = step.cost_per_item();
        let item_count = step.data().len();

        let runs = step.data().iter().cloned().enumerate().map(|(item_index, value)| {
            let work = step.work();
            let monitor = Arc::clone(&self.monitor);
            let name = name.clone();
            let call = StepCall {
                step: name.clone(),
                cost,
                item: Some(StepItem {
                    index: item_index,
                    value,
                }),
                inputs: Arc::clone(&inputs),
            };

            async move {
                let value = match tokio::task::spawn_blocking(move || work(call)).await {
                    Ok(Ok(value)) => value,
                    Ok(Err(err)) => {
                        return Err(PlanError::StepFailed {
                            step: name,
                            item: Some(item_index),
                            message: format!("item {item_index}: {err:#}"),
                        })
                    }
                    Err(join_error) => return Err(panicked(name, join_error)),
                };
                monitor
                    .mark_progress(ProgressUpdate::Relative(cost))
                    .await
                    .map_err(monitor_error)?;
                Ok((item_index, value))
            }
        });

        let mut pending = stream::iter(runs).buffer_unordered(self.num_workers);
        let mut results = vec![Value::Null; item_count];
        while let Some(finished) = pending.next().await {
            let (item_index, value) = finished?;
            results[item_index] = value;
        }

        debug!(step = %name, items = item_count, "Parallel step finished");
        Ok(Value::Array(results))
    }
}

fn monitor_error(err: anyhow::Error) -> PlanError {
    PlanError::Monitor {
        message: format!("{err:#}"),
    }
}

fn panicked(step: String, join_error: JoinError) -> PlanError {
    PlanError::WorkerPanicked {
        step,
        message: join_error.to_string(),
    }
}

//! # Plans
//!
//! In-process execution of an ordered list of steps.
//!
//! ## Overview
//!
//! A [`Plan`] is an ordered list of [`Step`]s. Each step has a work function, a
//! cost per item and a step count; a parallelizable step runs its work
//! function once per data item. `compute_plan_cost` assigns every step a
//! cumulative progress watermark so the last watermark equals the plan's cost.
//!
//! Steps reference earlier results through [`StepInput`]s:
//!
//! ```text
//! Relative(-1)           -> result of the previous step, keyed by its name
//! Named("decode")        -> result of the step called "decode"
//! Value { key, value }   -> a literal
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rfm_jobs::plan::{Plan, Step, StepInput};
//! use serde_json::json;
//!
//! let mut plan = Plan::new(vec![
//!     Step::new("list recordings", |_| Ok(json!([1, 2, 3]))),
//!     Step::new("classify", |call| Ok(json!(call.item_value().cloned())))
//!         .parallel(vec![json!(1), json!(2), json!(3)])
//!         .cost(4),
//!     Step::new("summarize", |call| Ok(json!(call.inputs.len())))
//!         .input(StepInput::Relative(-1)),
//! ]);
//! assert_eq!(plan.compute_plan_cost(), 1 + 12 + 1);
//! ```

pub mod plan_job;
pub mod plan_runner;

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use plan_job::{JobProgressMonitor, PlanBuilder, PlanJob, PlanTask};
pub use plan_runner::{PlanExecution, PlanMonitor, PlanRunner, ProgressUpdate};

/// Resolved inputs of a step, keyed by step name or literal key
pub type StepInputs = BTreeMap<String, Value>;

/// Work function of a step
pub type StepFn = Arc<dyn Fn(StepCall) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Step '{step}' failed: {message}")]
    StepFailed {
        step: String,
        /// Data item index for parallel steps
        item: Option<usize>,
        message: String,
    },

    #[error("Step '{step}' references unresolved input {reference}")]
    UnresolvedInput { step: String, reference: String },

    #[error("Worker for step '{step}' panicked: {message}")]
    WorkerPanicked { step: String, message: String },

    #[error("Progress monitor failed: {message}")]
    Monitor { message: String },
}

/// Reference from a step to a value it needs
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    /// Offset from the current step's index; `-1` is the previous step
    Relative(isize),
    /// Result of the earlier step with this name
    Named(String),
    Value { key: String, value: Value },
}

/// One data item of a parallel step
#[derive(Debug, Clone, PartialEq)]
pub struct StepItem {
    pub index: usize,
    pub value: Value,
}

/// Arguments handed to a work function
#[derive(Debug, Clone)]
pub struct StepCall {
    pub step: String,
    pub cost: u64,
    /// Set for each invocation of a parallel step
    pub item: Option<StepItem>,
    pub inputs: Arc<StepInputs>,
}

impl StepCall {
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    pub fn item_value(&self) -> Option<&Value> {
        self.item.as_ref().map(|item| &item.value)
    }
}

pub struct Step {
    name: String,
    work: StepFn,
    steps: u64,
    cost: u64,
    parallelizable: bool,
    data: Vec<Value>,
    inputs: Vec<StepInput>,
    index: usize,
    progress: u64,
    result: Option<Value>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("cost", &self.cost)
            .field("parallelizable", &self.parallelizable)
            .field("index", &self.index)
            .field("progress", &self.progress)
            .finish()
    }
}

impl Step {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(StepCall) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            work: Arc::new(work),
            steps: 1,
            cost: 1,
            parallelizable: false,
            data: Vec::new(),
            inputs: Vec::new(),
            index: 0,
            progress: 0,
            result: None,
        }
    }

    /// Cost of each item
    pub fn cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    /// Number of progress units this step accounts for
    pub fn steps(mut self, steps: u64) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Run the work function once per item on the worker pool
    pub fn parallel(mut self, data: Vec<Value>) -> Self {
        self.steps = (data.len() as u64).max(1);
        self.data = data;
        self.parallelizable = true;
        self
    }

    pub fn input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }

    pub fn cost_per_item(&self) -> u64 {
        self.cost
    }

    pub fn is_parallelizable(&self) -> bool {
        self.parallelizable
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn inputs(&self) -> &[StepInput] {
        &self.inputs
    }

    /// Cumulative cost up to and including this step
    pub fn progress(&self) -> u64 {
        self.progress
    }

    /// Set once the step has run
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub(crate) fn work(&self) -> StepFn {
        Arc::clone(&self.work)
    }

    pub(crate) fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }
}

/// Ordered list of steps with a cost table
#[derive(Debug, Default)]
pub struct Plan {
    steps: Vec<Step>,
    cost: u64,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, cost: 0 }
    }

    /// Insert at `position`, clamped to the end
    pub fn insert(&mut self, position: usize, steps: impl IntoIterator<Item = Step>) {
        let position = position.min(self.steps.len());
        self.steps.splice(position..position, steps);
    }

    pub fn append(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.steps.extend(steps);
    }

    pub fn prepend(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.insert(0, steps);
    }

    /// Assign indices and cumulative watermarks; returns the total cost
    pub fn compute_plan_cost(&mut self) -> u64 {
        let mut cost = 0;
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.index = index;
            cost += step.steps * step.cost;
            step.progress = cost;
        }
        self.cost = cost;
        cost
    }

    /// Total cost as of the last `compute_plan_cost`
    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub(crate) fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(name: &str) -> Step {
        Step::new(name, |_| Ok(Value::Null))
    }

    #[test]
    fn test_watermarks_are_cumulative() {
        let mut plan = Plan::new(vec![noop("a"), noop("b").steps(4), noop("c")]);
        assert_eq!(plan.compute_plan_cost(), 6);

        let watermarks: Vec<u64> = plan.iter().map(Step::progress).collect();
        assert_eq!(watermarks, vec![1, 5, 6]);
        assert_eq!(plan.cost(), 6);
    }

    #[test]
    fn test_parallel_step_counts_items() {
        let step = noop("fan-out").parallel(vec![json!(1), json!(2), json!(3)]).cost(2);
        assert!(step.is_parallelizable());
        assert_eq!(step.step_count(), 3);

        let mut plan = Plan::new(vec![step]);
        assert_eq!(plan.compute_plan_cost(), 6);
    }

    #[test]
    fn test_empty_parallel_step_still_counts_once() {
        assert_eq!(noop("empty").parallel(Vec::new()).step_count(), 1);
        assert_eq!(noop("zero").steps(0).step_count(), 1);
    }

    #[test]
    fn test_insert_prepend_append_reindex() {
        let mut plan = Plan::new(vec![noop("middle")]);
        plan.prepend([noop("first")]);
        plan.append([noop("last")]);
        plan.insert(99, [noop("after last")]);
        plan.insert(1, [noop("second")]);
        plan.compute_plan_cost();

        let names: Vec<&str> = plan.iter().map(Step::name).collect();
        assert_eq!(names, vec!["first", "second", "middle", "last", "after last"]);
        assert_eq!(plan.step("middle").unwrap().index(), 2);
    }
}

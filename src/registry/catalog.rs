use crate::error::{OrchestrationError, Result};
use crate::orchestration::builtin_tasks::register_builtin_tasks;
use crate::orchestration::planner::JobPlanner;
use crate::orchestration::task::TaskHandler;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a fresh task handler per lookup
pub type TaskConstructor = Arc<dyn Fn() -> Box<dyn TaskHandler> + Send + Sync>;

/// Builds a fresh job planner per lookup
pub type PlannerConstructor = Arc<dyn Fn() -> Box<dyn JobPlanner> + Send + Sync>;

const TASK_CATEGORY: &str = "task_type";
const PLANNER_CATEGORY: &str = "job.planner";

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub task_types: usize,
    pub planners: usize,
}

/// Catalog of constructors keyed by string, one map per category
#[derive(Default)]
pub struct Registry {
    tasks: DashMap<String, TaskConstructor>,
    planners: DashMap<String, PlannerConstructor>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("task_types", &self.task_keys())
            .field("planners", &self.planner_keys())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `job.plan`, `job.prepare_workspace`, `job.sync` and `job.end`
    pub fn with_builtin_tasks() -> Self {
        let registry = Self::new();
        register_builtin_tasks(&registry);
        registry
    }

    /// Register a task type; replaces any previous constructor for `key`
    pub fn register_task<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn TaskHandler> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.tasks.insert(key.clone(), Arc::new(constructor)).is_some() {
            warn!(category = TASK_CATEGORY, key = %key, "⚠️ Replacing registered constructor");
        } else {
            debug!(category = TASK_CATEGORY, key = %key, "Registered constructor");
        }
    }

    /// Register a job planner for a job type; replaces any previous constructor
    pub fn register_planner<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn JobPlanner> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.planners.insert(key.clone(), Arc::new(constructor)).is_some() {
            warn!(category = PLANNER_CATEGORY, key = %key, "⚠️ Replacing registered constructor");
        } else {
            debug!(category = PLANNER_CATEGORY, key = %key, "Registered constructor");
        }
    }

    /// Instantiate the task handler registered under `key`
    pub fn task(&self, key: &str) -> Result<Box<dyn TaskHandler>> {
        // Clone the constructor out so the shard lock is not held while it runs
        let constructor = self
            .tasks
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestrationError::not_found(TASK_CATEGORY, key))?;
        Ok(constructor())
    }

    /// Instantiate the planner registered for job type `key`
    pub fn planner(&self, key: &str) -> Result<Box<dyn JobPlanner>> {
        let constructor = self
            .planners
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestrationError::not_found(PLANNER_CATEGORY, key))?;
        Ok(constructor())
    }

    pub fn has_task(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn has_planner(&self, key: &str) -> bool {
        self.planners.contains_key(key)
    }

    pub fn task_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn planner_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.planners.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            task_types: self.tasks.len(),
            planners: self.planners.len(),
        }
    }
}

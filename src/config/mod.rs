//! # Configuration
//!
//! Layered configuration for the orchestration core.
//!
//! ## Sources (lowest to highest precedence)
//!
//! 1. Built-in defaults (`Default` impls below)
//! 2. `config/rfm-jobs.yaml`
//! 3. `config/rfm-jobs.<environment>.yaml`
//! 4. `RFM__<SECTION>__<KEY>` environment variables
//! 5. `DATABASE_URL`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rfm_jobs::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max_concurrency = manager.config().task_runner.effective_max_concurrency();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/rfm-jobs.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RfmConfig {
    /// Relational store holding jobs and the task graph
    pub database: DatabaseConfig,

    /// Shared filesystem locations
    pub paths: PathsConfig,

    /// Out-of-process task launcher
    pub task_runner: TaskRunnerConfig,

    /// In-process step executor
    pub plan_runner: PlanRunnerConfig,

    /// Job dispatch loop
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:rfm-jobs.db?mode=rwc".to_string(),
            max_connections: 5,
            busy_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory of job-scoped workspaces on the shared filesystem
    pub workspace_base: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace_base: std::env::temp_dir().join("rfm-jobs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskRunnerConfig {
    /// 0 means one process per available core
    pub max_concurrency: usize,
    /// Program and leading arguments; the task id is appended per launch
    pub runner_command: Vec<String>,
    pub poll_interval_ms: u64,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            runner_command: vec!["rfm-task-runner".to_string()],
            poll_interval_ms: 500,
        }
    }
}

impl TaskRunnerConfig {
    pub fn effective_max_concurrency(&self) -> usize {
        effective_parallelism(self.max_concurrency)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanRunnerConfig {
    /// 0 means one worker per available core
    pub num_workers: usize,
}

impl PlanRunnerConfig {
    pub fn effective_num_workers(&self) -> usize {
        effective_parallelism(self.num_workers)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub poll_interval_ms: u64,
    /// Consecutive idle polls with unfinished tasks before a job is declared stalled
    pub stall_poll_threshold: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            stall_poll_threshold: 5,
        }
    }
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl RfmConfig {
    /// Reject values the runners cannot operate with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "must not be empty",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "must be at least 1",
            ));
        }
        if self.task_runner.runner_command.is_empty()
            || self.task_runner.runner_command[0].trim().is_empty()
        {
            return Err(ConfigurationError::invalid_value(
                "task_runner.runner_command",
                "must name a program",
            ));
        }
        if self.task_runner.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "task_runner.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.driver.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "driver.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.driver.stall_poll_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "driver.stall_poll_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Host core count when `requested` is zero
pub fn effective_parallelism(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

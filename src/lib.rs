#![allow(clippy::doc_markdown)] // Allow technical terms like SQLite, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # RFM Jobs
//!
//! Job and task orchestration core for long-running bioacoustic analysis jobs.
//!
//! ## Overview
//!
//! A job (classification, training, retraining) is turned into a graph of
//! tasks persisted in a relational store, so progress, cancellation and
//! recovery survive process restarts. Tasks run with bounded concurrency, either
//! one OS process per task or inside a single process as an ordered plan of
//! steps with a worker pool for the parallel ones.
//!
//! ## Module Organization
//!
//! - [`models`] - Jobs, tasks, dependency edges and task types
//! - [`database`] - SQLite connection pool and schema migrations
//! - [`registry`] - Task type and job planner catalogs
//! - [`orchestration`] - Task state machine, planners, built-in tasks, job driver
//! - [`execution`] - Process-per-task runner and in-process dispatcher
//! - [`plan`] - In-process plans, the plan runner and the job lifecycle around it
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rfm_jobs::config::ConfigManager;
//! use rfm_jobs::database::{DatabaseConnection, DatabaseMigrations};
//! use rfm_jobs::execution::LocalTaskRunner;
//! use rfm_jobs::orchestration::{JobDriver, TaskEnvironment};
//! use rfm_jobs::registry::Registry;
//! use std::sync::Arc;
//!
//! # async fn example(job_id: i64) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let db = DatabaseConnection::connect(&config.database).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//!
//! let registry = Arc::new(Registry::with_builtin_tasks());
//! let env = TaskEnvironment::new(db.pool().clone(), registry, &config.paths.workspace_base);
//! let dispatcher = Arc::new(LocalTaskRunner::new(env, config.task_runner.max_concurrency));
//!
//! let driver = JobDriver::new(db.pool().clone(), dispatcher, config.driver.clone());
//! let outcome = driver.run_job(job_id).await?;
//! println!("job {job_id}: {outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod plan;
pub mod registry;

pub use config::{ConfigManager, RfmConfig};
pub use constants::{JobState, TaskStatus, TaskTypeId};
pub use error::{OrchestrationError, Result};
pub use execution::{LocalTaskRunner, TaskDispatcher, TaskRunner, TaskRunnerError};
pub use models::{Job, JobTask, JobTaskDependency, JobTaskType};
pub use orchestration::{JobDriver, JobPlanner, PlanningContext, Task, TaskEnvironment, TaskHandler};
pub use plan::{Plan, PlanError, PlanRunner, Step};
pub use registry::Registry;

//! # Registry Infrastructure
//!
//! Keyed catalogs of task type and job planner constructors.
//!
//! ## Overview
//!
//! A task row names its implementation indirectly: `job_tasks.type_id` maps to
//! an identifier in `job_task_types`, and the identifier is looked up here. Job
//! planners are looked up by the job's `job_type`.
//!
//! The registry is an explicit object built at startup and handed to the
//! driver and the runner binaries. There is no global instance.
//!
//! ## Usage
//!
//! ```rust
//! use rfm_jobs::registry::Registry;
//! use rfm_jobs::constants::task_types;
//!
//! let registry = Registry::with_builtin_tasks();
//! assert!(registry.task(task_types::JOB_SYNC_IDENTIFIER).is_ok());
//! assert!(registry.planner("classification").is_err());
//! ```

pub mod catalog;

pub use catalog::{PlannerConstructor, Registry, RegistryStats, TaskConstructor};

//! # Orchestration
//!
//! Task graph orchestration for long-running analysis jobs.
//!
//! ## Core Components
//!
//! - **Task**: a `job_tasks` row bound to its registered [`TaskHandler`]; `run`,
//!   `finish` and `mark_as` are its state transitions
//! - **JobPlanner**: builds a job's task DAG inside one transaction through the
//!   [`PlanningContext`] primitives
//! - **Built-in tasks**: `job.plan`, `job.prepare_workspace`, `job.sync`, `job.end`
//! - **JobDriver**: polls the store and feeds eligible tasks to a dispatcher
//!
//! ## Flow
//!
//! ```text
//! JobDriver::start ──▶ job.plan task ──▶ JobPlanner::plan ──▶ task rows + edges
//!        │                                                        │
//!        └── tick: find eligible ──▶ TaskDispatcher ──▶ execute_task ──▶ finish()
//!                      ▲                                                  │
//!                      └──────────── dependents' counters reach 0 ◀───────┘
//! ```

pub mod builtin_tasks;
pub mod job_driver;
pub mod planner;
pub mod task;

pub use builtin_tasks::{register_builtin_tasks, JobEndTask, PlanJobTask, PrepareWorkspaceTask, SyncTask};
pub use job_driver::{DriverOutcome, JobDriver, TickStatus};
pub use planner::{JobPlanner, PlanningContext};
pub use task::{execute_task, Task, TaskContext, TaskEnvironment, TaskExecution, TaskHandler};

//! # System Constants
//!
//! Status enums and built-in task type identifiers shared by the task graph
//! store, the planners and the runners.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single `job_tasks` row.
///
/// `Waiting` is the only non-terminal state: a task leaves it exactly once,
/// either through `finish()` or through `mark_as(Error, ..)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created by a planner, not yet finished
    Waiting,
    /// Finished successfully; its outgoing edges are satisfied
    Completed,
    /// Failed; dependents stay blocked
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Lifecycle of a `jobs` row as seen by the orchestration core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Error,
    Canceled,
}

impl JobState {
    /// Check if this is a terminal state (no further work is scheduled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Canceled)
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Numeric task type id as stored in `job_tasks.type_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskTypeId(pub i64);

impl fmt::Display for TaskTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Built-in task types seeded by the schema migration.
pub mod task_types {
    use super::TaskTypeId;

    pub const JOB_PLAN: TaskTypeId = TaskTypeId(1);
    pub const JOB_SYNC: TaskTypeId = TaskTypeId(8);
    pub const JOB_END: TaskTypeId = TaskTypeId(9);
    pub const JOB_PREPARE_WORKSPACE: TaskTypeId = TaskTypeId(15);

    pub const JOB_PLAN_IDENTIFIER: &str = "job.plan";
    pub const JOB_SYNC_IDENTIFIER: &str = "job.sync";
    pub const JOB_END_IDENTIFIER: &str = "job.end";
    pub const JOB_PREPARE_WORKSPACE_IDENTIFIER: &str = "job.prepare_workspace";
}

/// Step index used for the `job.plan` root task; planners place their own
/// tasks at steps above it so `delete_steps_higher_than(0)` clears a plan.
pub const PLAN_TASK_STEP: i64 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_round_trip_through_str() {
        for status in [TaskStatus::Waiting, TaskStatus::Completed, TaskStatus::Error] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_job_state_terminality() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert_eq!("canceled".parse::<JobState>().unwrap(), JobState::Canceled);
    }

    #[test]
    fn test_waiting_is_only_non_terminal_status() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }
}

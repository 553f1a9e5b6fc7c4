use crate::config::ConfigurationError;
use crate::execution::task_runner::TaskRunnerError;
use crate::plan::PlanError;

/// Errors surfaced by the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Unregistered task type or job planner, or a missing task/job row
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Task {task_id} is not eligible to run: {reason}")]
    TaskNotEligible { task_id: i64, reason: String },

    #[error("Task {task_id} failed: {message}")]
    TaskExecution { task_id: i64, message: String },

    #[error("Planning job {job_id} failed: {message}")]
    Planning { job_id: i64, message: String },

    #[error(transparent)]
    TaskRunner(#[from] TaskRunnerError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl OrchestrationError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Whether the caller is expected to retry after backing off
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TaskRunner(TaskRunnerError::AtMaximumConcurrency { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_entity_and_key() {
        let err = OrchestrationError::not_found("task type", "classify.recording");
        assert_eq!(err.to_string(), "task type not found: classify.recording");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_capacity_exhaustion_is_retryable() {
        let err: OrchestrationError = TaskRunnerError::AtMaximumConcurrency {
            max_concurrency: 2,
            in_flight: 2,
        }
        .into();
        assert!(err.is_retryable());
    }
}

pub mod job;
pub mod job_task;
pub mod job_task_dependency;
pub mod job_task_type;

// Re-export core models for easy access
pub use job::{Job, NewJob};
pub use job_task::{JobTask, NewJobTask, TaskStatusSummary};
pub use job_task_dependency::JobTaskDependency;
pub use job_task_type::{JobTaskType, TaskTypeResolution};

use crate::constants::TaskTypeId;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite};

/// JobTaskType maps a numeric `type_id` to the registry key of its
/// implementation. Maps to `job_task_types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct JobTaskType {
    pub type_id: i64,
    pub identifier: String,
}

/// Type resolution result for one task row
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TaskTypeResolution {
    pub task_id: i64,
    pub type_id: i64,
    /// `None` when the row points at a type id with no catalog entry
    pub identifier: Option<String>,
}

impl JobTaskType {
    pub fn id(&self) -> TaskTypeId {
        TaskTypeId(self.type_id)
    }

    pub async fn find_by_id<'e, E>(
        executor: E,
        type_id: TaskTypeId,
    ) -> Result<Option<JobTaskType>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTaskType>(
            "SELECT type_id, identifier FROM job_task_types WHERE type_id = ?",
        )
        .bind(type_id.0)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_identifier<'e, E>(
        executor: E,
        identifier: &str,
    ) -> Result<Option<JobTaskType>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTaskType>(
            "SELECT type_id, identifier FROM job_task_types WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(executor)
        .await
    }

    /// Insert or rename a catalog entry
    pub async fn upsert<'e, E>(
        executor: E,
        type_id: TaskTypeId,
        identifier: &str,
    ) -> Result<JobTaskType, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTaskType>(
            r#"
            INSERT INTO job_task_types (type_id, identifier)
            VALUES (?, ?)
            ON CONFLICT (type_id) DO UPDATE SET identifier = excluded.identifier
            RETURNING type_id, identifier
            "#,
        )
        .bind(type_id.0)
        .bind(identifier)
        .fetch_one(executor)
        .await
    }

    /// Resolve the type identifier of a task row; `None` when the task is missing
    pub async fn resolve_for_task<'e, E>(
        executor: E,
        task_id: i64,
    ) -> Result<Option<TaskTypeResolution>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, TaskTypeResolution>(
            r#"
            SELECT jt.task_id, jt.type_id, jtt.identifier
            FROM job_tasks jt
            LEFT JOIN job_task_types jtt ON jtt.type_id = jt.type_id
            WHERE jt.task_id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(executor)
        .await
    }
}

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqliteConnection};

use super::job_task::JobTask;

/// JobTaskDependency is a directed edge: `task_id` may not run until
/// `dependency_id` has completed.
/// Maps to `job_task_dependencies`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct JobTaskDependency {
    pub task_id: i64,
    pub dependency_id: i64,
    pub satisfied: bool,
}

impl JobTaskDependency {
    /// Add an edge from every task in `task_ids` to every task in
    /// `dependency_ids`, then refresh the counters of `task_ids`.
    ///
    /// Edges that already exist are left alone. An edge onto a completed
    /// dependency is inserted already satisfied. Callers must have checked
    /// that every dependency exists.
    pub async fn create_many(
        conn: &mut SqliteConnection,
        task_ids: &[i64],
        dependency_ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if task_ids.is_empty() || dependency_ids.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        for task_id in task_ids {
            for dependency_id in dependency_ids {
                inserted += sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO job_task_dependencies (task_id, dependency_id, satisfied)
                    SELECT ?, t.task_id, CASE WHEN t.status = 'completed' THEN 1 ELSE 0 END
                    FROM job_tasks t
                    WHERE t.task_id = ?
                    "#,
                )
                .bind(task_id)
                .bind(dependency_id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
            }
        }

        JobTask::recompute_dependency_counters(conn, task_ids).await?;
        Ok(inserted)
    }

    /// Incoming edges of a task
    pub async fn find_for_task<'e, E>(
        executor: E,
        task_id: i64,
    ) -> Result<Vec<JobTaskDependency>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTaskDependency>(
            r#"
            SELECT task_id, dependency_id, satisfied
            FROM job_task_dependencies
            WHERE task_id = ?
            ORDER BY dependency_id
            "#,
        )
        .bind(task_id)
        .fetch_all(executor)
        .await
    }

    /// Tasks that wait on `dependency_id`
    pub async fn find_dependents<'e, E>(executor: E, dependency_id: i64) -> Result<Vec<i64>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT task_id
            FROM job_task_dependencies
            WHERE dependency_id = ?
            ORDER BY task_id
            "#,
        )
        .bind(dependency_id)
        .fetch_all(executor)
        .await
    }

    /// Every edge inside one job
    pub async fn find_by_job<'e, E>(executor: E, job_id: i64) -> Result<Vec<JobTaskDependency>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTaskDependency>(
            r#"
            SELECT d.task_id, d.dependency_id, d.satisfied
            FROM job_task_dependencies d
            JOIN job_tasks t ON t.task_id = d.task_id
            WHERE t.job_id = ?
            ORDER BY d.task_id, d.dependency_id
            "#,
        )
        .bind(job_id)
        .fetch_all(executor)
        .await
    }
}

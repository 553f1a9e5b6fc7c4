use crate::constants::{TaskStatus, TaskTypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

/// Rows per multi-row INSERT; 8 binds each keeps us under SQLite's variable limit
const BULK_INSERT_CHUNK: usize = 100;
/// Ids per `IN (...)` list
const ID_LIST_CHUNK: usize = 500;

const RECOMPUTE_COUNTER_SQL: &str = r#"
    UPDATE job_tasks
    SET dependency_counter = (
        SELECT COUNT(*)
        FROM job_task_dependencies d
        WHERE d.task_id = job_tasks.task_id AND d.satisfied = 0
    )
"#;

/// JobTask is one node of a job's task graph.
/// Maps to `job_tasks`; `dependency_counter` always equals the number of
/// unsatisfied incoming edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobTask {
    pub task_id: i64,
    pub job_id: i64,
    pub step: i64,
    pub type_id: i64,
    pub dependency_counter: i64,
    pub status: TaskStatus,
    pub remark: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// JSON-encoded positional arguments; NULL when there are none
    pub args: Option<String>,
}

/// New JobTask for creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobTask {
    pub job_id: i64,
    pub step: i64,
    pub type_id: TaskTypeId,
    pub dependency_counter: i64,
    pub args: Vec<Value>,
}

/// Per-status task counts for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaskStatusSummary {
    pub total: i64,
    pub waiting: i64,
    /// Waiting with no unsatisfied dependency
    pub eligible: i64,
    pub completed: i64,
    pub error: i64,
}

impl TaskStatusSummary {
    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Encode positional arguments for the `args` column
pub fn encode_args(args: &[Value]) -> Result<Option<String>, sqlx::Error> {
    if args.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(args)
        .map(Some)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

impl JobTask {
    pub fn task_type(&self) -> TaskTypeId {
        TaskTypeId(self.type_id)
    }

    /// Waiting and unblocked
    pub fn is_eligible(&self) -> bool {
        self.status == TaskStatus::Waiting && self.dependency_counter == 0
    }

    /// Decoded positional arguments; a NULL column is an empty list
    pub fn decoded_args(&self) -> Result<Vec<Value>, serde_json::Error> {
        match self.args.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw),
        }
    }

    /// Insert a single task row
    pub async fn create(conn: &mut SqliteConnection, new_task: &NewJobTask) -> Result<i64, sqlx::Error> {
        let args = encode_args(&new_task.args)?;
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO job_tasks (job_id, step, type_id, dependency_counter, status, timestamp, args)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING task_id
            "#,
        )
        .bind(new_task.job_id)
        .bind(new_task.step)
        .bind(new_task.type_id.0)
        .bind(new_task.dependency_counter)
        .bind(TaskStatus::Waiting)
        .bind(Utc::now())
        .bind(args)
        .fetch_one(conn)
        .await
    }

    /// Insert one task per argument list, all sharing job, step and type.
    ///
    /// Returns the new ids in ascending order.
    pub async fn create_many(
        conn: &mut SqliteConnection,
        job_id: i64,
        step: i64,
        type_id: TaskTypeId,
        args_list: &[Vec<Value>],
    ) -> Result<Vec<i64>, sqlx::Error> {
        let mut task_ids = Vec::with_capacity(args_list.len());
        let now = Utc::now();

        for chunk in args_list.chunks(BULK_INSERT_CHUNK) {
            let encoded = chunk
                .iter()
                .map(|args| encode_args(args))
                .collect::<Result<Vec<_>, _>>()?;

            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO job_tasks (job_id, step, type_id, dependency_counter, status, timestamp, args) ",
            );
            builder.push_values(encoded, |mut row, args| {
                row.push_bind(job_id)
                    .push_bind(step)
                    .push_bind(type_id.0)
                    .push_bind(0_i64)
                    .push_bind(TaskStatus::Waiting)
                    .push_bind(now)
                    .push_bind(args);
            });
            builder.push(" RETURNING task_id");

            let mut chunk_ids: Vec<i64> = builder
                .build_query_scalar::<i64>()
                .fetch_all(&mut *conn)
                .await?;
            task_ids.append(&mut chunk_ids);
        }

        task_ids.sort_unstable();
        Ok(task_ids)
    }

    pub async fn find_by_id<'e, E>(executor: E, task_id: i64) -> Result<Option<JobTask>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTask>(
            r#"
            SELECT task_id, job_id, step, type_id, dependency_counter, status, remark, timestamp, args
            FROM job_tasks
            WHERE task_id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(executor)
        .await
    }

    /// All tasks of a job ordered by step, then id
    pub async fn find_by_job<'e, E>(executor: E, job_id: i64) -> Result<Vec<JobTask>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTask>(
            r#"
            SELECT task_id, job_id, step, type_id, dependency_counter, status, remark, timestamp, args
            FROM job_tasks
            WHERE job_id = ?
            ORDER BY step, task_id
            "#,
        )
        .bind(job_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_status<'e, E>(
        executor: E,
        job_id: i64,
        status: TaskStatus,
    ) -> Result<Vec<JobTask>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTask>(
            r#"
            SELECT task_id, job_id, step, type_id, dependency_counter, status, remark, timestamp, args
            FROM job_tasks
            WHERE job_id = ? AND status = ?
            ORDER BY step, task_id
            "#,
        )
        .bind(job_id)
        .bind(status)
        .fetch_all(executor)
        .await
    }

    /// Waiting tasks with no unsatisfied dependency, lowest step first
    pub async fn find_eligible<'e, E>(executor: E, job_id: i64) -> Result<Vec<JobTask>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, JobTask>(
            r#"
            SELECT task_id, job_id, step, type_id, dependency_counter, status, remark, timestamp, args
            FROM job_tasks
            WHERE job_id = ? AND status = ? AND dependency_counter = 0
            ORDER BY step, task_id
            "#,
        )
        .bind(job_id)
        .bind(TaskStatus::Waiting)
        .fetch_all(executor)
        .await
    }

    /// Ids among `task_ids` that exist
    pub async fn existing_ids(
        conn: &mut SqliteConnection,
        task_ids: &[i64],
    ) -> Result<Vec<i64>, sqlx::Error> {
        let mut found = Vec::with_capacity(task_ids.len());
        for chunk in task_ids.chunks(ID_LIST_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("SELECT task_id FROM job_tasks WHERE task_id IN (");
            let mut ids = builder.separated(", ");
            for task_id in chunk {
                ids.push_bind(*task_id);
            }
            ids.push_unseparated(")");
            let mut chunk_ids: Vec<i64> = builder
                .build_query_scalar::<i64>()
                .fetch_all(&mut *conn)
                .await?;
            found.append(&mut chunk_ids);
        }
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    /// Set status, remark and timestamp. Returns false when the row is missing.
    pub async fn mark_as<'e, E>(
        executor: E,
        task_id: i64,
        status: TaskStatus,
        remark: Option<&str>,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE job_tasks SET status = ?, remark = ?, timestamp = ? WHERE task_id = ?",
        )
        .bind(status)
        .bind(remark)
        .bind(Utc::now())
        .bind(task_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Complete a task and release its dependents in one transaction.
    ///
    /// Returns the dependents that became eligible. Finishing an already
    /// completed task leaves every counter unchanged.
    pub async fn finish(pool: &SqlitePool, task_id: i64, remark: &str) -> Result<Vec<i64>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let released = Self::finish_with(&mut *tx, task_id, remark).await?;
        tx.commit().await?;
        Ok(released)
    }

    /// `finish` on a caller-owned connection or transaction
    pub async fn finish_with(
        conn: &mut SqliteConnection,
        task_id: i64,
        remark: &str,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let remark = (!remark.is_empty()).then_some(remark);
        if !Self::mark_as(&mut *conn, task_id, TaskStatus::Completed, remark).await? {
            return Err(sqlx::Error::RowNotFound);
        }

        sqlx::query("UPDATE job_task_dependencies SET satisfied = 1 WHERE dependency_id = ?")
            .bind(task_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query(&format!(
            "{RECOMPUTE_COUNTER_SQL} WHERE task_id IN (SELECT task_id FROM job_task_dependencies WHERE dependency_id = ?)"
        ))
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT t.task_id
            FROM job_tasks t
            JOIN job_task_dependencies d ON d.task_id = t.task_id
            WHERE d.dependency_id = ? AND t.status = ? AND t.dependency_counter = 0
            ORDER BY t.task_id
            "#,
        )
        .bind(task_id)
        .bind(TaskStatus::Waiting)
        .fetch_all(&mut *conn)
        .await
    }

    /// Recompute `dependency_counter` from the edge table for the given tasks
    pub async fn recompute_dependency_counters(
        conn: &mut SqliteConnection,
        task_ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        for chunk in task_ids.chunks(ID_LIST_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(RECOMPUTE_COUNTER_SQL);
            builder.push(" WHERE task_id IN (");
            let mut ids = builder.separated(", ");
            for task_id in chunk {
                ids.push_bind(*task_id);
            }
            ids.push_unseparated(")");
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    /// Recompute `dependency_counter` for every task of a job
    pub async fn recompute_job_counters(conn: &mut SqliteConnection, job_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("{RECOMPUTE_COUNTER_SQL} WHERE job_id = ?"))
            .bind(job_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete every task of the job with `step > step`, along with edges
    /// touching them. Counters of surviving tasks are recomputed.
    pub async fn delete_steps_higher_than(
        conn: &mut SqliteConnection,
        job_id: i64,
        step: i64,
    ) -> Result<u64, sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM job_task_dependencies
            WHERE task_id IN (SELECT task_id FROM job_tasks WHERE job_id = ? AND step > ?)
               OR dependency_id IN (SELECT task_id FROM job_tasks WHERE job_id = ? AND step > ?)
            "#,
        )
        .bind(job_id)
        .bind(step)
        .bind(job_id)
        .bind(step)
        .execute(&mut *conn)
        .await?;

        let deleted = sqlx::query("DELETE FROM job_tasks WHERE job_id = ? AND step > ?")
            .bind(job_id)
            .bind(step)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        Self::recompute_job_counters(conn, job_id).await?;
        Ok(deleted)
    }

    pub async fn count_for_job<'e, E>(executor: E, job_id: i64) -> Result<i64, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_tasks WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(executor)
            .await
    }

    pub async fn status_summary<'e, E>(executor: E, job_id: i64) -> Result<TaskStatusSummary, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, TaskStatusSummary>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'waiting' THEN 1 ELSE 0 END), 0) AS waiting,
                COALESCE(SUM(CASE WHEN status = 'waiting' AND dependency_counter = 0 THEN 1 ELSE 0 END), 0) AS eligible,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) AS error
            FROM job_tasks
            WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_one(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task(args: Option<&str>) -> JobTask {
        JobTask {
            task_id: 1,
            job_id: 1,
            step: 0,
            type_id: 1,
            dependency_counter: 0,
            status: TaskStatus::Waiting,
            remark: None,
            timestamp: Utc::now(),
            args: args.map(str::to_string),
        }
    }

    #[test]
    fn test_null_args_decode_to_empty_list() {
        assert!(sample_task(None).decoded_args().unwrap().is_empty());
        assert!(sample_task(Some("")).decoded_args().unwrap().is_empty());
    }

    #[test]
    fn test_args_encoding() {
        assert_eq!(encode_args(&[]).unwrap(), None);
        let encoded = encode_args(&[json!("scan"), json!(3)]).unwrap();
        assert_eq!(encoded.as_deref(), Some(r#"["scan",3]"#));
        assert_eq!(
            sample_task(encoded.as_deref()).decoded_args().unwrap(),
            vec![json!("scan"), json!(3)]
        );
    }

    #[test]
    fn test_eligibility() {
        let mut task = sample_task(None);
        assert!(task.is_eligible());
        task.dependency_counter = 1;
        assert!(!task.is_eligible());
        task.dependency_counter = 0;
        task.status = TaskStatus::Error;
        assert!(!task.is_eligible());
    }
}

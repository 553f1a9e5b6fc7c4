use crate::constants::JobState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool};

/// Job represents one orchestrated analysis run.
/// Maps to the `jobs` table; the orchestration core only advances
/// `progress`, `progress_steps`, `state` and `remarks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub job_id: i64,
    pub job_type: String,
    pub project_id: Option<i64>,
    pub user_id: Option<i64>,
    pub progress_steps: i64,
    pub progress: i64,
    pub state: JobState,
    pub cancel_requested: bool,
    pub remarks: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// New Job for creation (normally done by the surrounding application)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub project_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            project_id: None,
            user_id: None,
        }
    }
}

impl Job {
    pub async fn create<'e, E>(executor: E, new_job: &NewJob) -> Result<Job, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (job_type, project_id, user_id, state, last_update)
            VALUES (?, ?, ?, ?, ?)
            RETURNING job_id, job_type, project_id, user_id, progress_steps, progress,
                      state, cancel_requested, remarks, last_update
            "#,
        )
        .bind(&new_job.job_type)
        .bind(new_job.project_id)
        .bind(new_job.user_id)
        .bind(JobState::Pending)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, job_id: i64) -> Result<Option<Job>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT job_id, job_type, project_id, user_id, progress_steps, progress,
                   state, cancel_requested, remarks, last_update
            FROM jobs
            WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(executor)
        .await
    }

    /// Reset progress for a fresh run of `progress_steps` cost units
    pub async fn prepare_run<'e, E>(
        executor: E,
        job_id: i64,
        progress_steps: i64,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress_steps = ?, progress = 0, state = ?, last_update = ?
            WHERE job_id = ?
            "#,
        )
        .bind(progress_steps)
        .bind(JobState::Processing)
        .bind(Utc::now())
        .bind(job_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set progress to an absolute watermark
    pub async fn update_progress<'e, E>(
        executor: E,
        job_id: i64,
        progress: i64,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE jobs SET progress = ?, last_update = ? WHERE job_id = ?")
            .bind(progress)
            .bind(Utc::now())
            .bind(job_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Advance progress by `delta` cost units, never past `progress_steps`
    pub async fn add_progress<'e, E>(executor: E, job_id: i64, delta: i64) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE jobs SET progress = MIN(progress + ?, progress_steps), last_update = ? WHERE job_id = ?",
        )
            .bind(delta)
            .bind(Utc::now())
            .bind(job_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Mark the job completed with progress at its total
    pub async fn finish_run<'e, E>(executor: E, job_id: i64) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = progress_steps, state = ?, last_update = ?
            WHERE job_id = ?
            "#,
        )
        .bind(JobState::Completed)
        .bind(Utc::now())
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_state<'e, E>(
        executor: E,
        job_id: i64,
        state: JobState,
        remarks: Option<&str>,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, remarks = COALESCE(?, remarks), last_update = ?
            WHERE job_id = ?
            "#,
        )
        .bind(state)
        .bind(remarks)
        .bind(Utc::now())
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Raise the externally-set cancellation flag
    pub async fn request_cancel<'e, E>(executor: E, job_id: i64) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE jobs SET cancel_requested = 1, last_update = ? WHERE job_id = ?")
            .bind(Utc::now())
            .bind(job_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Observe the cancellation flag, moving a non-terminal job to `canceled`
    /// the first time it is seen.
    ///
    /// A job row that no longer exists counts as canceled.
    pub async fn check_cancel_status(pool: &SqlitePool, job_id: i64) -> Result<bool, sqlx::Error> {
        let Some(job) = Self::find_by_id(pool, job_id).await? else {
            return Ok(true);
        };

        if job.state == JobState::Canceled {
            return Ok(true);
        }
        if !job.cancel_requested {
            return Ok(false);
        }

        if !job.state.is_terminal() {
            Self::mark_state(pool, job_id, JobState::Canceled, None).await?;
        }
        Ok(true)
    }
}

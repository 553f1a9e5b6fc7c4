//! # Database Migration System
//!
//! Migrations live in `migrations/` using the `YYYYMMDDHHMMSS_description.sql`
//! naming convention and are embedded into the binary at compile time, so
//! runner processes never depend on the working directory.

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::SqlitePool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies the embedded schema migrations.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all pending migrations in order; already-applied ones are skipped
    pub async fn run_all(pool: &SqlitePool) -> Result<(), MigrateError> {
        MIGRATOR.run(pool).await?;
        info!(
            migrations = MIGRATOR.iter().count(),
            "Database schema is up to date"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConnection;

    #[tokio::test]
    async fn test_migrations_are_idempotent_and_seed_builtin_types() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        DatabaseMigrations::run_all(db.pool()).await.unwrap();
        DatabaseMigrations::run_all(db.pool()).await.unwrap();

        let identifiers: Vec<String> =
            sqlx::query_scalar("SELECT identifier FROM job_task_types ORDER BY type_id")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(
            identifiers,
            vec!["job.plan", "job.sync", "job.end", "job.prepare_workspace"]
        );
    }
}

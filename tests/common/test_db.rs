use rfm_jobs::database::{DatabaseConnection, DatabaseMigrations};
use rfm_jobs::registry::Registry;
use rfm_jobs::orchestration::TaskEnvironment;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// Fresh migrated in-memory database
pub async fn test_pool() -> SqlitePool {
    let db = DatabaseConnection::in_memory()
        .await
        .expect("in-memory database should open");
    DatabaseMigrations::run_all(db.pool())
        .await
        .expect("migrations should apply");
    db.pool().clone()
}

/// Migrated file database allowing several concurrent connections
pub async fn file_pool(dir: &Path, max_connections: u32) -> SqlitePool {
    let config = rfm_jobs::config::DatabaseConfig {
        url: format!("sqlite:{}", dir.join("jobs.db").display()),
        max_connections,
        busy_timeout_ms: 30_000,
    };
    let db = DatabaseConnection::connect(&config)
        .await
        .expect("file database should open");
    DatabaseMigrations::run_all(db.pool())
        .await
        .expect("migrations should apply");
    db.pool().clone()
}

pub fn test_environment(pool: &SqlitePool, registry: Registry, workspace_base: &Path) -> TaskEnvironment {
    TaskEnvironment::new(pool.clone(), Arc::new(registry), workspace_base)
}

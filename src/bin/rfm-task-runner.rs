//! # RFM Task Runner
//!
//! Executes one task row and exits. This is the command the process-based
//! `TaskRunner` launches, with the task id appended.
//!
//! Exit codes: 0 completed, 1 failed (recorded on the task row when possible),
//! 2 not eligible (row left untouched).
//!
//! This binary registers only the built-in task types (`job.plan`,
//! `job.prepare_workspace`, `job.sync`, `job.end`) and no job planners, so a
//! `job.plan` task fails with `job.planner not found`. It is a template:
//! applications build their own runner with their task types and planners
//! registered on the `Registry`, keeping this structure.

use clap::Parser;
use rfm_jobs::config::ConfigManager;
use rfm_jobs::database::{DatabaseConnection, DatabaseMigrations};
use rfm_jobs::logging::init_structured_logging;
use rfm_jobs::orchestration::{execute_task, TaskEnvironment};
use rfm_jobs::registry::Registry;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "rfm-task-runner")]
#[command(about = "Run a single job task to completion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: config)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Overrides database.url from the configuration
    #[arg(long)]
    database_url: Option<String>,

    /// Task to execute
    task_id: i64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "❌ Task runner failed before executing the task");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let manager = ConfigManager::load_from_directory(cli.config_dir)?;
    let mut database = manager.config().database.clone();
    if let Some(url) = cli.database_url {
        database.url = url;
    }

    let db = DatabaseConnection::connect(&database).await?;
    DatabaseMigrations::run_all(db.pool()).await?;

    // Only the built-in task types; application task types need their own build
    let env = TaskEnvironment::new(
        db.pool().clone(),
        Arc::new(Registry::with_builtin_tasks()),
        &manager.config().paths.workspace_base,
    )
    .with_plan_workers(manager.config().plan_runner.effective_num_workers());
    let execution = execute_task(&env, cli.task_id).await;
    db.close().await;
    Ok(execution.exit_code())
}

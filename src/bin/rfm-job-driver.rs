//! # RFM Job Driver
//!
//! Drives one job from its `job.plan` root task to a terminal state,
//! launching one `rfm-task-runner` process per task.
//!
//! Like `rfm-task-runner`, this is a template. With `--in-process` only the
//! built-in task types are registered and no planners, so any job fails at
//! `job.plan`. Applications build their own driver (and runner command) with
//! their planners and task types registered.

use clap::Parser;
use rfm_jobs::config::ConfigManager;
use rfm_jobs::database::{DatabaseConnection, DatabaseMigrations};
use rfm_jobs::execution::{LocalTaskRunner, TaskDispatcher, TaskRunner};
use rfm_jobs::logging::init_structured_logging;
use rfm_jobs::orchestration::{DriverOutcome, JobDriver, TaskEnvironment};
use rfm_jobs::registry::Registry;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rfm-job-driver")]
#[command(about = "Drive a job's task graph to completion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: config)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Overrides database.url from the configuration
    #[arg(long)]
    database_url: Option<String>,

    /// Run tasks inside this process instead of launching runner processes
    #[arg(long)]
    in_process: bool,

    /// Job to drive
    job_id: i64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    match run(cli).await {
        Ok(DriverOutcome::Completed) => process::exit(0),
        Ok(outcome) => {
            info!(outcome = ?outcome, "Job did not complete");
            process::exit(1);
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "❌ Job driver failed");
            process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<DriverOutcome> {
    let manager = ConfigManager::load_from_directory(cli.config_dir)?;
    let config = manager.config();
    let mut database = config.database.clone();
    if let Some(url) = cli.database_url {
        database.url = url;
    }

    let db = DatabaseConnection::connect(&database).await?;
    DatabaseMigrations::run_all(db.pool()).await?;

    let dispatcher: Arc<dyn TaskDispatcher> = if cli.in_process {
        let env = TaskEnvironment::new(
            db.pool().clone(),
            Arc::new(Registry::with_builtin_tasks()),
            &config.paths.workspace_base,
        )
        .with_plan_workers(config.plan_runner.effective_num_workers());
        Arc::new(LocalTaskRunner::new(
            env,
            config.task_runner.effective_max_concurrency(),
        ))
    } else {
        Arc::new(TaskRunner::from_config(&config.task_runner))
    };

    let driver = JobDriver::new(db.pool().clone(), dispatcher, config.driver.clone());
    let outcome = driver.run_job(cli.job_id).await?;
    db.close().await;
    Ok(outcome)
}

//! # Database Operations
//!
//! SQLite persistence for jobs and their task graphs.
//!
//! ## Key Components
//!
//! - [`connection`] - Connection pool setup (WAL, busy timeout, foreign keys)
//! - [`migrations`] - Embedded schema migrations from `migrations/`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use rfm_jobs::config::DatabaseConfig;
//! use rfm_jobs::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;

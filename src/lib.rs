pub mod analytics;
pub mod config;
mod db;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod importer;
pub mod models;
pub mod otd;
pub mod policy;
pub mod tabular;
pub mod transitions;

pub use crate::config::EngineConfig;
pub use crate::db::Database;
pub use crate::directory::{StaticUserDirectory, UserDirectory};
pub use crate::engine::OpsEngine;
pub use crate::errors::{AppError, AppResult};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger. `RUST_LOG` wins over `filter` when set.
/// Calling it again after a subscriber is installed returns an error.
pub fn init_tracing(log_dir: &Path, filter: &str) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "ops-records.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

/// Loads configuration from the environment, starts logging when a log
/// directory is configured, and opens the engine.
pub fn bootstrap() -> AppResult<OpsEngine> {
    let config = EngineConfig::from_env()?;
    if let Some(log_dir) = &config.log_dir {
        init_tracing(log_dir, &config.log_filter)?;
    }
    OpsEngine::open(&config)
}

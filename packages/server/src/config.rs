use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
///
/// Every knob has a default so a bare `DATABASE_URL` is enough to boot.
#[derive(Debug, Clone)]
pub struct Config {
    /// Metadata database (connections, configs, jobs, checkpoints).
    pub database_url: String,
    pub port: u16,
    /// Number of sync workers consuming the job queue.
    pub worker_count: usize,
    /// Fallback batch size when a sync config does not set one.
    pub default_batch_size: u32,
    /// Process memory cap for the batch governor, in MiB.
    pub max_memory_mb: u64,
    /// Hard deadline for one job from dequeue to finalization.
    pub job_timeout: Duration,
    /// How long `Stop` waits for running jobs before abandoning them.
    pub shutdown_grace: Duration,
    /// Terminal jobs older than this are purged at startup.
    pub history_retention_days: u32,
    /// How long a submission waits for queue space before failing overloaded.
    pub submit_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_count: env::var("SYNC_WORKER_COUNT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("SYNC_WORKER_COUNT must be a valid number")?,
            default_batch_size: env::var("SYNC_DEFAULT_BATCH_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("SYNC_DEFAULT_BATCH_SIZE must be a valid number")?,
            max_memory_mb: env::var("SYNC_MAX_MEMORY_MB")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .context("SYNC_MAX_MEMORY_MB must be a valid number")?,
            job_timeout: Duration::from_secs(
                env::var("SYNC_JOB_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .context("SYNC_JOB_TIMEOUT_SECS must be a valid number")?,
            ),
            shutdown_grace: Duration::from_secs(
                env::var("SYNC_SHUTDOWN_GRACE_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("SYNC_SHUTDOWN_GRACE_SECS must be a valid number")?,
            ),
            history_retention_days: env::var("SYNC_HISTORY_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("SYNC_HISTORY_RETENTION_DAYS must be a valid number")?,
            submit_timeout: Duration::from_secs(
                env::var("SYNC_SUBMIT_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("SYNC_SUBMIT_TIMEOUT_SECS must be a valid number")?,
            ),
        })
    }
}

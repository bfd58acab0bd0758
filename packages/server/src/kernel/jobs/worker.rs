//! Worker loop: one dequeued job from load to finalization.

use std::sync::Arc;
use std::time::Duration;

use sqlx::MySqlPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::common::sql::Record;
use crate::domains::configs::{DatabaseMapping, SyncConfig, TableMapping};
use crate::kernel::error::SyncError;
use crate::kernel::monitoring::{Monitoring, TableDelta, TableStatus};
use crate::kernel::sync::checkpoint::CheckpointStore;
use crate::kernel::sync::SyncEngine;

use super::engine::JobEngine;
use super::job::{JobStatus, SyncJob};
use super::log::LogLevel;

/// Persistent progress counters are refreshed at least this often while a
/// job runs, so restarts and external readers see recent numbers.
const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

struct RunOutcome {
    status: JobStatus,
    error: Option<String>,
}

/// Execute one dequeued job id end to end. Never panics the worker loop:
/// every failure path finalizes the job instead.
pub(crate) async fn process_job(
    engine: &Arc<JobEngine>,
    worker_id: usize,
    job_id: i64,
    shutdown: &CancellationToken,
) {
    let job = match SyncJob::get(job_id, &engine.db).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            debug!(worker_id, job_id, "dequeued id no longer exists");
            return;
        }
        Err(e) => {
            error!(worker_id, job_id, error = %e, "failed to load job");
            return;
        }
    };

    // Cancelled-before-start submissions are already terminal.
    if job.status != JobStatus::Pending {
        debug!(worker_id, job_id, status = ?job.status, "skipping non-pending job");
        return;
    }

    let config = match SyncConfig::find_by_id(job.sync_config_id, &engine.db).await {
        Ok(config) => config,
        Err(e) => {
            finalize(engine, job_id, JobStatus::Failed, Some(&e.to_string())).await;
            return;
        }
    };

    let mappings = match TableMapping::enabled_for_config(config.id, &engine.db).await {
        Ok(mappings) => mappings,
        Err(e) => {
            finalize(engine, job_id, JobStatus::Failed, Some(&e.to_string())).await;
            return;
        }
    };
    let overrides = DatabaseMapping::for_config(config.id, &engine.db)
        .await
        .unwrap_or_default();

    match SyncJob::mark_running(job_id, mappings.len() as i32, &engine.db).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(worker_id, job_id, "job cancelled before start");
            return;
        }
        Err(e) => {
            finalize(engine, job_id, JobStatus::Failed, Some(&e.to_string())).await;
            return;
        }
    }

    engine
        .monitoring
        .start_job_monitoring(job_id, config.id, mappings.len() as i32);
    engine
        .monitoring
        .log_job_event(
            job_id,
            None,
            LogLevel::Info,
            &format!("job started with {} table(s)", mappings.len()),
        )
        .await;

    let token = shutdown.child_token();
    engine.register_job(job_id, token.clone()).await;

    let flusher = tokio::spawn(progress_flusher(
        engine.db.clone(),
        Arc::clone(&engine.monitoring),
        job_id,
        token.clone(),
    ));

    let outcome = tokio::select! {
        _ = tokio::time::sleep(engine.config.job_timeout) => {
            token.cancel();
            RunOutcome {
                status: JobStatus::Failed,
                error: Some(format!(
                    "job timeout after {}s",
                    engine.config.job_timeout.as_secs()
                )),
            }
        }
        outcome = run_mappings(engine, job_id, &config, &mappings, &overrides, &token) => outcome,
    };

    finalize(engine, job_id, outcome.status, outcome.error.as_deref()).await;

    token.cancel();
    let _ = flusher.await;
    engine.unregister_job(job_id).await;

    info!(worker_id, job_id, status = ?outcome.status, "job finalized");
}

/// Sequentially sync every enabled mapping in ordinal order.
async fn run_mappings(
    engine: &Arc<JobEngine>,
    job_id: i64,
    config: &SyncConfig,
    mappings: &[TableMapping],
    overrides: &[DatabaseMapping],
    token: &CancellationToken,
) -> RunOutcome {
    let source = match engine.pools.acquire(config.source_connection_id).await {
        Ok(pool) => pool,
        Err(e) => {
            return RunOutcome {
                status: JobStatus::Failed,
                error: Some(format!("source connect: {e}")),
            }
        }
    };
    let target = match engine.pools.acquire(config.target_connection_id).await {
        Ok(pool) => pool,
        Err(e) => {
            return RunOutcome {
                status: JobStatus::Failed,
                error: Some(format!("target connect: {e}")),
            }
        }
    };

    let (source_schema, target_schema) =
        DatabaseMapping::resolve_pair(overrides, &config.source_schema, &config.target_schema);

    let options = config.options();
    let checkpoints = CheckpointStore::new(engine.db.clone());
    let mut failed_tables: Vec<String> = Vec::new();

    for mapping in mappings {
        if token.is_cancelled() {
            return RunOutcome {
                status: JobStatus::Cancelled,
                error: None,
            };
        }

        let sync = SyncEngine {
            job_id,
            source: &source,
            target: &target,
            source_schema,
            target_schema,
            options: &options,
            monitoring: &engine.monitoring,
            checkpoints: &checkpoints,
            memory: &engine.memory,
            cancel: token,
        };

        match sync.sync_table(mapping).await {
            Ok(outcome) => {
                engine.monitoring.update_table_progress(
                    job_id,
                    &mapping.source_table,
                    TableDelta {
                        status: Some(TableStatus::Completed),
                        ..Default::default()
                    },
                );
                engine.monitoring.update_job_progress(job_id, 1);
                engine
                    .monitoring
                    .log_job_event(
                        job_id,
                        Some(&mapping.source_table),
                        LogLevel::Info,
                        &format!(
                            "table synced: {} of {} row(s), {} batch error(s)",
                            outcome.processed_rows, outcome.total_rows, outcome.error_count
                        ),
                    )
                    .await;
            }
            Err(SyncError::Cancelled) => {
                return RunOutcome {
                    status: JobStatus::Cancelled,
                    error: None,
                };
            }
            Err(e) => {
                engine.monitoring.update_table_progress(
                    job_id,
                    &mapping.source_table,
                    TableDelta {
                        status: Some(TableStatus::Failed),
                        ..Default::default()
                    },
                );
                engine
                    .monitoring
                    .log_job_event(
                        job_id,
                        Some(&mapping.source_table),
                        LogLevel::Error,
                        &format!("table failed: {e}"),
                    )
                    .await;
                failed_tables.push(mapping.source_table.clone());
            }
        }
    }

    if !mappings.is_empty() && failed_tables.len() == mappings.len() {
        RunOutcome {
            status: JobStatus::Failed,
            error: Some(format!("all tables failed: {}", failed_tables.join(", "))),
        }
    } else {
        RunOutcome {
            status: JobStatus::Completed,
            error: None,
        }
    }
}

/// Finalize through the monitoring ledger so the active entry is always
/// released, then mirror the outcome into the log stream.
async fn finalize(engine: &Arc<JobEngine>, job_id: i64, status: JobStatus, error: Option<&str>) {
    if let Err(e) = engine
        .monitoring
        .finish_job_monitoring(job_id, status, error)
        .await
    {
        error!(job_id, error = %e, "failed to persist job finalization");
    }

    let (level, message) = match (status, error) {
        (JobStatus::Completed, _) => (LogLevel::Info, "job completed".to_string()),
        (JobStatus::Cancelled, _) => (LogLevel::Info, "job cancelled".to_string()),
        (_, Some(error)) => (LogLevel::Error, format!("job failed: {error}")),
        (_, None) => (LogLevel::Error, "job failed".to_string()),
    };
    engine
        .monitoring
        .log_job_event(job_id, None, level, &message)
        .await;
}

/// Flush in-memory counters into the persistent job row every few seconds
/// while the job runs.
async fn progress_flusher(
    db: MySqlPool,
    monitoring: Arc<Monitoring>,
    job_id: i64,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(PROGRESS_FLUSH_INTERVAL) => {}
        }

        let Some(summary) = monitoring.snapshot_job(job_id) else {
            break;
        };
        if let Err(e) = SyncJob::update_progress(
            job_id,
            summary.completed_tables,
            summary.total_rows,
            summary.processed_rows,
            &db,
        )
        .await
        {
            debug!(job_id, error = %e, "progress flush failed");
        }
    }
}

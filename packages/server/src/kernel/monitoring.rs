//! The in-process progress ledger and its persistent spill.
//!
//! Exactly one `Monitoring` instance exists per process: `SyncKernel`
//! allocates it and every consumer (job engine, HTTP adapter) holds a clone
//! of that one `Arc`. The in-memory `active` map is the authoritative view
//! of running jobs; the persistent store only sees submissions, log lines,
//! and terminal outcomes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::MySqlPool;
use tracing::{error, warn};

use crate::common::Page;
use crate::kernel::jobs::{JobStatus, LogLevel, SyncJob, SyncLog};

const STATISTICS_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Progress types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Running,
    Completed,
    Failed,
}

/// Per-table progress, kept only in memory while the job runs.
#[derive(Debug, Clone, Serialize)]
pub struct TableProgress {
    pub status: TableStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub error_count: u32,
}

/// Snapshot of one active job, served to the read path as a deep copy.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: i64,
    pub sync_config_id: i64,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub total_tables: i32,
    pub completed_tables: i32,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub tables: HashMap<String, TableProgress>,
}

/// Additive progress update for a table. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableDelta {
    pub status: Option<TableStatus>,
    pub total_rows: Option<i64>,
    pub processed_rows: i64,
    pub errors: u32,
}

/// Aggregate metrics over the whole job history.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatistics {
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub running_jobs: i64,
    pub total_rows_synced: i64,
    pub total_tables_synced: i64,
    pub avg_job_duration_min: f64,
    pub error_rate_pct: f64,
    pub sync_frequency_per_hour: f64,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Final counters handed to the store when a job leaves the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalCounters {
    pub completed_tables: i32,
    pub total_rows: i64,
    pub processed_rows: i64,
}

// ============================================================================
// Store seam
// ============================================================================

/// Persistence used by the ledger. Split out as a trait so the ledger's
/// contract can be tested against an in-memory fake.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Persist a terminal status (with end time and final counters).
    async fn finalize_job(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
        counters: FinalCounters,
    ) -> Result<()>;

    async fn append_log(
        &self,
        job_id: i64,
        table: Option<&str>,
        level: LogLevel,
        message: &str,
    ) -> Result<()>;

    async fn history(&self, page: Page) -> Result<Vec<SyncJob>>;

    async fn job_logs(&self, job_id: i64) -> Result<Vec<SyncLog>>;

    async fn statistics(&self) -> Result<SyncStatistics>;
}

/// Production store over the metadata database.
pub struct MySqlMonitorStore {
    db: MySqlPool,
}

impl MySqlMonitorStore {
    pub fn new(db: MySqlPool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_jobs: i64,
    completed_jobs: i64,
    failed_jobs: i64,
    cancelled_jobs: i64,
    running_jobs: i64,
    total_rows_synced: i64,
    total_tables_synced: i64,
    avg_job_duration_min: f64,
    jobs_last_24h: i64,
    last_sync_time: Option<DateTime<Utc>>,
}

#[async_trait]
impl MonitorStore for MySqlMonitorStore {
    async fn finalize_job(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
        counters: FinalCounters,
    ) -> Result<()> {
        SyncJob::update_progress(
            job_id,
            counters.completed_tables,
            counters.total_rows,
            counters.processed_rows,
            &self.db,
        )
        .await?;
        SyncJob::finalize(job_id, status, error, &self.db).await?;
        Ok(())
    }

    async fn append_log(
        &self,
        job_id: i64,
        table: Option<&str>,
        level: LogLevel,
        message: &str,
    ) -> Result<()> {
        SyncLog::append(job_id, table, level, message, &self.db).await
    }

    async fn history(&self, page: Page) -> Result<Vec<SyncJob>> {
        SyncJob::history(page, &self.db).await
    }

    async fn job_logs(&self, job_id: i64) -> Result<Vec<SyncLog>> {
        SyncLog::for_job(job_id, &self.db).await
    }

    async fn statistics(&self) -> Result<SyncStatistics> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*)                                             AS total_jobs,
                COUNT(CASE WHEN status = 'completed' THEN 1 END)     AS completed_jobs,
                COUNT(CASE WHEN status = 'failed' THEN 1 END)        AS failed_jobs,
                COUNT(CASE WHEN status = 'cancelled' THEN 1 END)     AS cancelled_jobs,
                COUNT(CASE WHEN status = 'running' THEN 1 END)       AS running_jobs,
                CAST(COALESCE(SUM(processed_rows), 0) AS SIGNED)     AS total_rows_synced,
                CAST(COALESCE(SUM(completed_tables), 0) AS SIGNED)   AS total_tables_synced,
                CAST(COALESCE(AVG(CASE
                    WHEN start_time IS NOT NULL AND end_time IS NOT NULL
                    THEN TIMESTAMPDIFF(SECOND, start_time, end_time)
                END), 0) AS DOUBLE) / 60.0                           AS avg_job_duration_min,
                COUNT(CASE WHEN created_at >= NOW(6) - INTERVAL 24 HOUR THEN 1 END)
                                                                     AS jobs_last_24h,
                MAX(end_time)                                        AS last_sync_time
            FROM sync_jobs
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let terminal = row.completed_jobs + row.failed_jobs + row.cancelled_jobs;
        let error_rate_pct = if terminal > 0 {
            row.failed_jobs as f64 / terminal as f64 * 100.0
        } else {
            0.0
        };

        Ok(SyncStatistics {
            total_jobs: row.total_jobs,
            completed_jobs: row.completed_jobs,
            failed_jobs: row.failed_jobs,
            running_jobs: row.running_jobs,
            total_rows_synced: row.total_rows_synced,
            total_tables_synced: row.total_tables_synced,
            avg_job_duration_min: row.avg_job_duration_min,
            error_rate_pct,
            sync_frequency_per_hour: row.jobs_last_24h as f64 / 24.0,
            last_sync_time: row.last_sync_time,
        })
    }
}

// ============================================================================
// Monitoring
// ============================================================================

/// The single in-process progress ledger.
pub struct Monitoring {
    store: Box<dyn MonitorStore>,
    active: Mutex<HashMap<i64, JobSummary>>,
    stats_cache: Mutex<Option<(Instant, SyncStatistics)>>,
}

impl Monitoring {
    /// The only place the ledger map is allocated.
    pub fn new(store: impl MonitorStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            active: Mutex::new(HashMap::new()),
            stats_cache: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<i64, JobSummary>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a running summary for a freshly dequeued job.
    pub fn start_job_monitoring(&self, job_id: i64, sync_config_id: i64, total_tables: i32) {
        let summary = JobSummary {
            job_id,
            sync_config_id,
            status: JobStatus::Running,
            start_time: Utc::now(),
            total_tables,
            completed_tables: 0,
            total_rows: 0,
            processed_rows: 0,
            tables: HashMap::new(),
        };
        self.lock_active().insert(job_id, summary);
    }

    /// Additive job-level progress (completed tables roll-up).
    pub fn update_job_progress(&self, job_id: i64, completed_tables_delta: i32) {
        let mut active = self.lock_active();
        if let Some(summary) = active.get_mut(&job_id) {
            summary.completed_tables += completed_tables_delta;
        }
    }

    /// Apply a table delta and roll its counters up into the job summary.
    pub fn update_table_progress(&self, job_id: i64, table: &str, delta: TableDelta) {
        let mut active = self.lock_active();
        let Some(summary) = active.get_mut(&job_id) else {
            return;
        };

        let progress = summary
            .tables
            .entry(table.to_string())
            .or_insert_with(|| TableProgress {
                status: TableStatus::Running,
                started_at: Utc::now(),
                ended_at: None,
                total_rows: 0,
                processed_rows: 0,
                error_count: 0,
            });

        if let Some(total) = delta.total_rows {
            summary.total_rows += total - progress.total_rows;
            progress.total_rows = total;
        }
        progress.processed_rows += delta.processed_rows;
        summary.processed_rows += delta.processed_rows;
        progress.error_count += delta.errors;
        if let Some(status) = delta.status {
            progress.status = status;
            if status != TableStatus::Running {
                progress.ended_at = Some(Utc::now());
            }
        }
    }

    /// Remove the job from the ledger and persist its terminal outcome.
    ///
    /// The ledger entry is removed and the statistics cache invalidated
    /// before the persistence write, so the in-memory view is clean on every
    /// return path, including store failures.
    pub async fn finish_job_monitoring(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let removed = self.lock_active().remove(&job_id);
        self.invalidate_statistics();

        let counters = removed
            .map(|summary| FinalCounters {
                completed_tables: summary.completed_tables,
                total_rows: summary.total_rows,
                processed_rows: summary.processed_rows,
            })
            .unwrap_or_default();

        self.store.finalize_job(job_id, status, error, counters).await
    }

    /// Deep-copy snapshot of every active job, ordered by job id.
    pub fn get_active_jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<_> = self.lock_active().values().cloned().collect();
        jobs.sort_by_key(|summary| summary.job_id);
        jobs
    }

    pub fn is_active(&self, job_id: i64) -> bool {
        self.lock_active().contains_key(&job_id)
    }

    /// Deep copy of one active job's summary.
    pub fn snapshot_job(&self, job_id: i64) -> Option<JobSummary> {
        self.lock_active().get(&job_id).cloned()
    }

    pub async fn get_sync_history(&self, page: Page) -> Result<Vec<SyncJob>> {
        self.store.history(page).await
    }

    pub async fn get_job_logs(&self, job_id: i64) -> Result<Vec<SyncLog>> {
        self.store.job_logs(job_id).await
    }

    /// Aggregate statistics, cached for five minutes and invalidated on every
    /// job finalization.
    pub async fn get_statistics(&self) -> Result<SyncStatistics> {
        {
            let cache = self.stats_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((at, stats)) = cache.as_ref() {
                if at.elapsed() < STATISTICS_TTL {
                    return Ok(stats.clone());
                }
            }
        }

        let stats = self.store.statistics().await?;
        let mut cache = self.stats_cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some((Instant::now(), stats.clone()));
        Ok(stats)
    }

    fn invalidate_statistics(&self) {
        let mut cache = self.stats_cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }

    /// Append a log row and mirror it onto the tracing output.
    pub async fn log_job_event(
        &self,
        job_id: i64,
        table: Option<&str>,
        level: LogLevel,
        message: &str,
    ) {
        match level {
            LogLevel::Info => tracing::info!(job_id, table, "{message}"),
            LogLevel::Warn => warn!(job_id, table, "{message}"),
            LogLevel::Error => error!(job_id, table, "{message}"),
        }

        if let Err(e) = self.store.append_log(job_id, table, level, message).await {
            warn!(job_id, error = %e, "failed to persist job log entry");
        }
    }
}

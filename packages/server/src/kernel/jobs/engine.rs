//! The job engine: dispatcher queue, worker set, lifecycle, recovery.
//!
//! `JobEngine` is the shared handle (submit, cancel, introspection);
//! `EngineService` drives the workers and owns the queue's receiving end.
//! Submissions flow through a bounded channel sized at four slots per
//! worker, so a full queue pushes back on submitters instead of piling up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::MySqlPool;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::kernel::error::{SyncError, SyncResult};
use crate::kernel::monitoring::Monitoring;
use crate::kernel::pool::ConnectionPool;
use crate::kernel::service::Service;
use crate::kernel::sync::memory::MemoryGovernor;

use super::job::{JobStatus, SyncJob};
use super::worker;

/// Queue slots per worker.
const QUEUE_FACTOR: usize = 4;

/// A `running` job older than this at startup is an orphan.
const ORPHAN_AGE: Duration = Duration::from_secs(5 * 60);

/// A `pending` job older than this at startup expired before starting.
const PENDING_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub job_timeout: Duration,
    pub shutdown_grace: Duration,
    pub submit_timeout: Duration,
    /// Batch size applied to configs created without explicit options.
    pub default_batch_size: u32,
    pub max_memory_mb: u64,
    pub history_retention_days: u32,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            job_timeout: config.job_timeout,
            shutdown_grace: config.shutdown_grace,
            submit_timeout: config.submit_timeout,
            default_batch_size: config.default_batch_size,
            max_memory_mb: config.max_memory_mb,
            history_retention_days: config.history_retention_days,
        }
    }
}

/// Shared engine handle. One per process, like the `Monitoring` it reports to.
pub struct JobEngine {
    pub(crate) db: MySqlPool,
    pub(crate) pools: Arc<ConnectionPool>,
    pub(crate) monitoring: Arc<Monitoring>,
    pub(crate) memory: Arc<MemoryGovernor>,
    pub(crate) config: EngineConfig,
    queue: mpsc::Sender<i64>,
    running: AtomicBool,
    worker_count: AtomicUsize,
    running_jobs: RwLock<HashMap<i64, CancellationToken>>,
}

impl JobEngine {
    /// Build the engine handle plus the service that drives its workers.
    pub fn new(
        db: MySqlPool,
        pools: Arc<ConnectionPool>,
        monitoring: Arc<Monitoring>,
        config: EngineConfig,
    ) -> (Arc<Self>, EngineService) {
        let (tx, rx) = mpsc::channel(config.worker_count * QUEUE_FACTOR);

        let worker_count = config.worker_count;
        let engine = Arc::new(Self {
            db,
            pools,
            monitoring,
            memory: Arc::new(MemoryGovernor::new(config.max_memory_mb)),
            config,
            queue: tx,
            running: AtomicBool::new(false),
            worker_count: AtomicUsize::new(worker_count),
            running_jobs: RwLock::new(HashMap::new()),
        });

        let service = EngineService {
            engine: Arc::clone(&engine),
            receiver: Arc::new(Mutex::new(rx)),
        };

        (engine, service)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    /// Change the worker count for the next start. Rejected while running.
    pub fn set_worker_count(&self, n: usize) -> SyncResult<()> {
        if self.is_running() {
            return Err(SyncError::configuration(
                "worker count can only change while the engine is stopped",
            ));
        }
        if n == 0 {
            return Err(SyncError::configuration("worker count must be positive"));
        }
        self.worker_count.store(n, Ordering::SeqCst);
        Ok(())
    }

    /// Submit a job for one sync config. Persists the `pending` row, then
    /// enqueues it; a queue that stays full past the submission deadline
    /// fails the job as overloaded.
    pub async fn submit_job(&self, sync_config_id: i64) -> SyncResult<i64> {
        use crate::common::sql::Record;
        use crate::domains::configs::SyncConfig;

        if !self.is_running() {
            return Err(SyncError::EngineNotRunning);
        }

        let config = SyncConfig::find_by_id(sync_config_id, &self.db)
            .await
            .map_err(|_| SyncError::not_found("sync config", sync_config_id))?;
        if !config.enabled {
            return Err(SyncError::ConfigDisabled(sync_config_id));
        }
        config.validate().map_err(SyncError::Configuration)?;

        let job = SyncJob::insert_pending(sync_config_id, &self.db)
            .await
            .map_err(|e| SyncError::internal(e.to_string()))?;

        let enqueued =
            tokio::time::timeout(self.config.submit_timeout, self.queue.send(job.id)).await;

        match enqueued {
            Ok(Ok(())) => {
                info!(job_id = job.id, sync_config_id, "job submitted");
                Ok(job.id)
            }
            _ => {
                warn!(job_id = job.id, "queue full, failing submission");
                let _ = SyncJob::finalize(
                    job.id,
                    JobStatus::Failed,
                    Some("engine overloaded: queue full"),
                    &self.db,
                )
                .await;
                Err(SyncError::Overloaded)
            }
        }
    }

    /// Cancel a job. Idempotent: terminal jobs are a successful no-op.
    pub async fn cancel_job(&self, job_id: i64) -> SyncResult<()> {
        let job = SyncJob::get(job_id, &self.db)
            .await
            .map_err(|e| SyncError::internal(e.to_string()))?
            .ok_or(SyncError::not_found("sync job", job_id))?;

        match job.status {
            JobStatus::Pending => {
                // Finalize now; the worker skips non-pending ids on dequeue.
                self.monitoring
                    .finish_job_monitoring(job_id, JobStatus::Cancelled, None)
                    .await
                    .map_err(|e| SyncError::internal(e.to_string()))?;
                info!(job_id, "pending job cancelled");
                Ok(())
            }
            JobStatus::Running => {
                let tokens = self.running_jobs.read().await;
                if let Some(token) = tokens.get(&job_id) {
                    token.cancel();
                    info!(job_id, "cancellation signalled");
                } else {
                    // Persisted as running but owned by no worker here; the
                    // next recovery pass will fail it as an orphan.
                    warn!(job_id, "running job has no local worker");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub async fn get_job(&self, job_id: i64) -> SyncResult<SyncJob> {
        SyncJob::get(job_id, &self.db)
            .await
            .map_err(|e| SyncError::internal(e.to_string()))?
            .ok_or(SyncError::not_found("sync job", job_id))
    }

    pub(crate) async fn register_job(&self, job_id: i64, token: CancellationToken) {
        self.running_jobs.write().await.insert(job_id, token);
    }

    pub(crate) async fn unregister_job(&self, job_id: i64) {
        self.running_jobs.write().await.remove(&job_id);
    }

    async fn cancel_all_running(&self) {
        let tokens = self.running_jobs.read().await;
        for token in tokens.values() {
            token.cancel();
        }
    }

    /// Startup pass: fail orphans, requeue or expire stale pending jobs,
    /// purge history past the retention horizon.
    async fn recover(&self) -> Result<()> {
        let now = Utc::now();

        for job in SyncJob::by_status(JobStatus::Running, &self.db).await? {
            let age = job
                .start_time
                .map(|started| now.signed_duration_since(started))
                .and_then(|age| age.to_std().ok());
            let orphaned = match age {
                Some(age) => age >= ORPHAN_AGE,
                // running without a start time is an invariant breach
                None => true,
            };
            if orphaned {
                warn!(job_id = job.id, "failing orphaned job");
                SyncJob::finalize(
                    job.id,
                    JobStatus::Failed,
                    Some("engine restart: orphaned"),
                    &self.db,
                )
                .await?;
            }
        }

        for job in SyncJob::by_status(JobStatus::Pending, &self.db).await? {
            let age = now
                .signed_duration_since(job.created_at)
                .to_std()
                .unwrap_or_default();
            if age <= PENDING_MAX_AGE {
                if self.queue.try_send(job.id).is_ok() {
                    info!(job_id = job.id, "requeued pending job");
                } else {
                    SyncJob::finalize(
                        job.id,
                        JobStatus::Failed,
                        Some("engine overloaded: queue full at recovery"),
                        &self.db,
                    )
                    .await?;
                }
            } else {
                SyncJob::finalize(
                    job.id,
                    JobStatus::Failed,
                    Some("expired before start"),
                    &self.db,
                )
                .await?;
            }
        }

        let purged = SyncJob::purge_history(self.config.history_retention_days, &self.db).await?;
        if purged > 0 {
            info!(purged, "purged terminal jobs past retention");
        }

        Ok(())
    }
}

/// Drives the worker set. Registered with the `ServiceHost`.
pub struct EngineService {
    engine: Arc<JobEngine>,
    receiver: Arc<Mutex<mpsc::Receiver<i64>>>,
}

#[async_trait::async_trait]
impl Service for EngineService {
    fn name(&self) -> &'static str {
        "job-engine"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let engine = self.engine;

        if let Err(e) = engine.recover().await {
            error!(error = %e, "recovery pass failed");
        }

        engine.running.store(true, Ordering::SeqCst);
        let worker_count = engine.worker_count();
        info!(workers = worker_count, "job engine running");

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let engine = Arc::clone(&engine);
            let receiver = Arc::clone(&self.receiver);
            let shutdown = shutdown.clone();

            workers.spawn(async move {
                loop {
                    let job_id = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            id = rx.recv() => id,
                        }
                    };
                    let Some(job_id) = job_id else { break };

                    // Job execution runs in its own task so a panic inside a
                    // sync never kills the worker loop; it surfaces here and
                    // finalizes the job instead.
                    let run = {
                        let engine = Arc::clone(&engine);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            worker::process_job(&engine, worker_id, job_id, &shutdown).await;
                        })
                    };
                    if let Err(join_err) = run.await {
                        if join_err.is_panic() {
                            error!(worker_id, job_id, "job execution panicked");
                            if let Err(e) = engine
                                .monitoring
                                .finish_job_monitoring(
                                    job_id,
                                    JobStatus::Failed,
                                    Some("internal error: job execution panicked"),
                                )
                                .await
                            {
                                error!(job_id, error = %e, "failed to finalize panicked job");
                            }
                            engine.unregister_job(job_id).await;
                        }
                    }
                }
            });
        }

        shutdown.cancelled().await;
        engine.running.store(false, Ordering::SeqCst);
        info!("job engine stopping, draining workers");

        // Workers observe the engine token between batches; give them the
        // grace window to finalize, then abandon the rest. Abandoned jobs
        // surface as orphans on the next boot.
        engine.cancel_all_running().await;
        let drained = tokio::time::timeout(engine.config.shutdown_grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                grace_secs = engine.config.shutdown_grace.as_secs(),
                "grace period elapsed, aborting remaining workers"
            );
            workers.abort_all();
        }

        engine.pools.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_config() -> EngineConfig {
        EngineConfig {
            worker_count: 2,
            job_timeout: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(1),
            default_batch_size: 1_000,
            max_memory_mb: 512,
            history_retention_days: 30,
        }
    }

    fn lazy_engine() -> (Arc<JobEngine>, EngineService) {
        use crate::kernel::monitoring::{Monitoring, MySqlMonitorStore};

        let db = MySqlPool::connect_lazy("mysql://user:pw@localhost:3306/meta").unwrap();
        let pools = Arc::new(ConnectionPool::new(db.clone()));
        let monitoring = Arc::new(Monitoring::new(MySqlMonitorStore::new(db.clone())));
        JobEngine::new(db, pools, monitoring, engine_config())
    }

    #[test]
    fn queue_capacity_is_four_per_worker() {
        let config = engine_config();
        assert_eq!(config.worker_count * QUEUE_FACTOR, 8);
    }

    #[tokio::test]
    async fn submit_requires_a_running_engine() {
        let (engine, _service) = lazy_engine();
        let err = engine.submit_job(1).await.unwrap_err();
        assert!(matches!(err, SyncError::EngineNotRunning));
    }

    #[tokio::test]
    async fn worker_count_changes_only_while_stopped() {
        let (engine, _service) = lazy_engine();

        assert!(engine.set_worker_count(0).is_err());
        engine.set_worker_count(3).unwrap();
        assert_eq!(engine.worker_count(), 3);

        engine.running.store(true, Ordering::SeqCst);
        assert!(engine.set_worker_count(4).is_err());
        assert_eq!(engine.worker_count(), 3);
    }

    #[test]
    fn worker_count_floor_is_one() {
        let mut app = crate::config::Config {
            database_url: "mysql://localhost".to_string(),
            port: 8080,
            worker_count: 0,
            default_batch_size: 1_000,
            max_memory_mb: 512,
            job_timeout: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(60),
            history_retention_days: 30,
            submit_timeout: Duration::from_secs(5),
        };
        assert_eq!(EngineConfig::from_config(&app).worker_count, 1);

        app.worker_count = 8;
        assert_eq!(EngineConfig::from_config(&app).worker_count, 8);
    }
}

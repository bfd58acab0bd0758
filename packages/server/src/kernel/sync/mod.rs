//! Per-table batched streaming replication.
//!
//! One `SyncEngine` call copies a single `(job, table mapping)` pair. The
//! mode ladder: an incremental mapping without a checkpoint (or without a
//! usable tracking column) falls back to a full pass; a full pass on an
//! incremental mapping bootstraps the first checkpoint.

pub mod batch;
pub mod checkpoint;
pub mod memory;
pub mod tracking;

use std::time::Duration;

use sqlx::MySqlPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domains::configs::{SyncMode, SyncOptions, TableMapping};
use crate::kernel::error::{SyncError, SyncResult};
use crate::kernel::jobs::LogLevel;
use crate::kernel::monitoring::{Monitoring, TableDelta, TableStatus};

use batch::RowBatch;
use checkpoint::{CheckpointMeta, CheckpointStore, Watermark};
use memory::MemoryGovernor;
use tracking::{ColumnInfo, TrackingColumn};

/// Pause before the single retry of a failed batch.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Consecutive batch failures that abort the table.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Final result of one table copy.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub table: String,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub error_count: u32,
}

/// Everything one table copy needs, borrowed from the worker.
pub struct SyncEngine<'a> {
    pub job_id: i64,
    pub source: &'a MySqlPool,
    pub target: &'a MySqlPool,
    pub source_schema: &'a str,
    pub target_schema: &'a str,
    pub options: &'a SyncOptions,
    pub monitoring: &'a Monitoring,
    pub checkpoints: &'a CheckpointStore,
    pub memory: &'a MemoryGovernor,
    pub cancel: &'a CancellationToken,
}

impl SyncEngine<'_> {
    /// Replicate one mapping. Table-scoped failures come back as `Err`; the
    /// worker decides whether the job survives.
    pub async fn sync_table(&self, mapping: &TableMapping) -> SyncResult<TableOutcome> {
        self.check_cancelled()?;

        let table = mapping.source_table.as_str();
        let target_columns = self.describe(self.target, self.target_schema, &mapping.target_table).await?;
        if target_columns.is_empty() {
            return Err(SyncError::schema_mismatch(
                &mapping.target_table,
                "table does not exist on the target",
            ));
        }
        let source_columns = self.describe(self.source, self.source_schema, table).await?;
        if source_columns.is_empty() {
            return Err(SyncError::source_unreadable(
                table,
                "table does not exist on the source",
            ));
        }

        let source_names: Vec<String> = source_columns.iter().map(|c| c.name.clone()).collect();
        let target_names: Vec<String> = target_columns.iter().map(|c| c.name.clone()).collect();
        batch::check_column_coverage(&mapping.target_table, &source_names, &target_names)?;

        match mapping.mode {
            SyncMode::Full => {
                self.full_pass(mapping, &source_columns, None).await
            }
            SyncMode::Incremental => {
                self.incremental_entry(mapping, &source_columns, &target_columns)
                    .await
            }
        }
    }

    async fn incremental_entry(
        &self,
        mapping: &TableMapping,
        source_columns: &[ColumnInfo],
        target_columns: &[ColumnInfo],
    ) -> SyncResult<TableOutcome> {
        let Some(tracking) = tracking::pick_tracking_column(target_columns) else {
            self.log(
                mapping,
                LogLevel::Warn,
                &format!(
                    "no usable tracking column on `{}`; running a full sync for this run",
                    mapping.target_table
                ),
            )
            .await;
            return self.full_pass(mapping, source_columns, None).await;
        };

        match self.checkpoints.load(mapping.id).await {
            Ok(Some(checkpoint)) => {
                if let Some(watermark) = checkpoint.watermark() {
                    return self.incremental_pass(mapping, &tracking, watermark).await;
                }
                // A checkpoint without a parseable watermark re-bootstraps.
                self.full_pass(mapping, source_columns, Some(&tracking)).await
            }
            Ok(None) => {
                self.log(
                    mapping,
                    LogLevel::Info,
                    "no checkpoint yet; bootstrapping with a full sync",
                )
                .await;
                self.full_pass(mapping, source_columns, Some(&tracking)).await
            }
            Err(e) => Err(SyncError::internal(format!(
                "checkpoint load for mapping {}: {e}",
                mapping.id
            ))),
        }
    }

    /// Full copy, optionally bootstrapping a checkpoint for an incremental
    /// mapping on success.
    async fn full_pass(
        &self,
        mapping: &TableMapping,
        source_columns: &[ColumnInfo],
        bootstrap: Option<&TrackingColumn>,
    ) -> SyncResult<TableOutcome> {
        let table = mapping.source_table.as_str();
        let where_clause = mapping.where_clause.as_deref();

        let total = self.count_source(mapping, None, None).await?;
        self.monitoring.update_table_progress(
            self.job_id,
            table,
            TableDelta {
                total_rows: Some(total),
                ..Default::default()
            },
        );

        let order_column = tracking::pick_order_column(source_columns);
        let select_sql =
            batch::full_select_sql(self.source_schema, table, where_clause, order_column.as_deref());

        let mut outcome = TableOutcome {
            table: table.to_string(),
            total_rows: total,
            processed_rows: 0,
            error_count: 0,
        };
        let mut batch_size = memory::initial_batch_size(total, self.options.batch_size);
        let mut offset: i64 = 0;
        let mut consecutive_failures = 0u32;
        let mut max_seen: Option<Watermark> = None;

        loop {
            self.check_cancelled()?;

            let limit = batch_size as i64;
            let rows = self.fetch_page(table, &select_sql, None, limit, Some(offset)).await?;
            let page = RowBatch::decode(&rows)?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len() as i64;

            if let Some(tracking) = bootstrap {
                if let Some(value) = page.last_value_of(&tracking.name) {
                    if let Some(mark) = Watermark::from_value(value) {
                        max_seen = Some(match max_seen {
                            Some(current) => current.advanced_to(mark),
                            None => mark,
                        });
                    }
                }
            }

            self.write_with_retry(mapping, &page, &mut outcome, &mut consecutive_failures)
                .await?;

            outcome.processed_rows += fetched;
            offset += fetched;
            self.monitoring.update_table_progress(
                self.job_id,
                table,
                TableDelta {
                    processed_rows: fetched,
                    ..Default::default()
                },
            );

            batch_size = self.memory.govern(batch_size).await;
            if fetched < limit {
                break;
            }
        }

        // First successful full pass of an incremental mapping records where
        // the next run should start.
        if let Some(tracking) = bootstrap {
            let meta = CheckpointMeta {
                tracking_column: tracking.name.clone(),
                kind: tracking.kind,
            };
            self.checkpoints
                .save(mapping.id, max_seen, &meta)
                .await
                .map_err(|e| SyncError::internal(format!("checkpoint save: {e}")))?;
        }

        Ok(outcome)
    }

    /// Incremental copy: the watermark predicate advances batch by batch and
    /// the checkpoint follows it.
    async fn incremental_pass(
        &self,
        mapping: &TableMapping,
        tracking: &TrackingColumn,
        start: Watermark,
    ) -> SyncResult<TableOutcome> {
        let table = mapping.source_table.as_str();
        let where_clause = mapping.where_clause.as_deref();

        let total = self
            .count_source(mapping, Some(&tracking.name), Some(start))
            .await?;
        self.monitoring.update_table_progress(
            self.job_id,
            table,
            TableDelta {
                total_rows: Some(total),
                ..Default::default()
            },
        );

        let select_sql =
            batch::incremental_select_sql(self.source_schema, table, where_clause, &tracking.name);
        let meta = CheckpointMeta {
            tracking_column: tracking.name.clone(),
            kind: tracking.kind,
        };

        let mut outcome = TableOutcome {
            table: table.to_string(),
            total_rows: total,
            processed_rows: 0,
            error_count: 0,
        };
        let mut batch_size = memory::initial_batch_size(total, self.options.batch_size);
        let mut watermark = start;
        let mut consecutive_failures = 0u32;

        loop {
            self.check_cancelled()?;

            let limit = batch_size as i64;
            let rows = self
                .fetch_page(table, &select_sql, Some(watermark), limit, None)
                .await?;
            let page = RowBatch::decode(&rows)?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len() as i64;

            let batch_max = page
                .last_value_of(&tracking.name)
                .and_then(Watermark::from_value)
                .ok_or_else(|| {
                    SyncError::internal(format!(
                        "tracking column `{}` missing from source rows",
                        tracking.name
                    ))
                })?;

            self.write_with_retry(mapping, &page, &mut outcome, &mut consecutive_failures)
                .await?;

            // Advance even when the batch was skipped after its retry, or the
            // same rows would be refetched forever.
            watermark = watermark.advanced_to(batch_max);
            self.checkpoints
                .save(mapping.id, Some(watermark), &meta)
                .await
                .map_err(|e| SyncError::internal(format!("checkpoint save: {e}")))?;

            outcome.processed_rows += fetched;
            self.monitoring.update_table_progress(
                self.job_id,
                table,
                TableDelta {
                    processed_rows: fetched,
                    ..Default::default()
                },
            );

            batch_size = self.memory.govern(batch_size).await;
            if fetched < limit {
                break;
            }
        }

        Ok(outcome)
    }

    /// Execute one batch write under the retry policy: one retry after a
    /// pause, then skip the batch; too many consecutive failures abort the
    /// table. Non-retryable errors abort immediately.
    async fn write_with_retry(
        &self,
        mapping: &TableMapping,
        page: &RowBatch,
        outcome: &mut TableOutcome,
        consecutive_failures: &mut u32,
    ) -> SyncResult<()> {
        let conflict = self.options.conflict_resolution;

        let first = batch::write_batch(
            self.target,
            self.target_schema,
            &mapping.target_table,
            page,
            conflict,
        )
        .await;

        let first_err = match first {
            Ok(_) => {
                *consecutive_failures = 0;
                return Ok(());
            }
            Err(e) => e,
        };

        if !first_err.is_retryable() {
            return Err(first_err);
        }

        outcome.error_count += 1;
        self.monitoring.update_table_progress(
            self.job_id,
            &mapping.source_table,
            TableDelta {
                errors: 1,
                ..Default::default()
            },
        );
        self.log(
            mapping,
            LogLevel::Error,
            &format!("batch write failed, retrying once: {first_err}"),
        )
        .await;

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(RETRY_PAUSE) => {}
        }

        match batch::write_batch(
            self.target,
            self.target_schema,
            &mapping.target_table,
            page,
            conflict,
        )
        .await
        {
            Ok(_) => {
                *consecutive_failures = 0;
                Ok(())
            }
            Err(e) if !e.is_retryable() => Err(e),
            Err(e) => {
                *consecutive_failures += 1;
                outcome.error_count += 1;
                self.monitoring.update_table_progress(
                    self.job_id,
                    &mapping.source_table,
                    TableDelta {
                        errors: 1,
                        ..Default::default()
                    },
                );

                if *consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    self.log(
                        mapping,
                        LogLevel::Error,
                        &format!(
                            "{MAX_CONSECUTIVE_FAILURES} consecutive batch failures, aborting table: {e}"
                        ),
                    )
                    .await;
                    Err(e)
                } else {
                    // Skip this batch and continue with the next.
                    self.log(
                        mapping,
                        LogLevel::Error,
                        &format!("batch retry failed, skipping batch: {e}"),
                    )
                    .await;
                    Ok(())
                }
            }
        }
    }

    async fn count_source(
        &self,
        mapping: &TableMapping,
        watermark_column: Option<&str>,
        watermark: Option<Watermark>,
    ) -> SyncResult<i64> {
        let sql = batch::count_sql(
            self.source_schema,
            &mapping.source_table,
            mapping.where_clause.as_deref(),
            watermark_column,
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(mark) = watermark {
            query = match mark.to_value() {
                batch::SqlValue::DateTime(ts) => query.bind(ts),
                batch::SqlValue::Int(id) => query.bind(id),
                _ => query,
            };
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = query.fetch_one(self.source) => {
                result.map_err(|e| SyncError::source_unreadable(&mapping.source_table, e.to_string()))
            }
        }
    }

    /// Fetch one page from the source, racing the cancellation token. The
    /// watermark (incremental) or offset (full) positions the page.
    async fn fetch_page(
        &self,
        table: &str,
        select_sql: &str,
        watermark: Option<Watermark>,
        limit: i64,
        offset: Option<i64>,
    ) -> SyncResult<Vec<sqlx::mysql::MySqlRow>> {
        let bound = watermark.map(Watermark::to_value);
        let mut query = sqlx::query(select_sql);
        if let Some(value) = &bound {
            query = value.bind_to(query);
        }
        query = query.bind(limit);
        if let Some(offset) = offset {
            query = query.bind(offset);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = query.fetch_all(self.source) => {
                result.map_err(|e| SyncError::source_unreadable(table, e.to_string()))
            }
        }
    }

    async fn describe(
        &self,
        pool: &MySqlPool,
        schema: &str,
        table: &str,
    ) -> SyncResult<Vec<ColumnInfo>> {
        tracking::table_columns(pool, schema, table)
            .await
            .map_err(|e| SyncError::internal(format!("describe `{schema}`.`{table}`: {e}")))
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            debug!(job_id = self.job_id, "cancellation observed between batches");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn log(&self, mapping: &TableMapping, level: LogLevel, message: &str) {
        self.monitoring
            .log_job_event(self.job_id, Some(&mapping.source_table), level, message)
            .await;
    }
}

//! Sync job model and persistent state machine.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};

use crate::common::Page;

/// Lifecycle states. `Pending -> Running -> {Completed | Failed | Cancelled}`;
/// terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine admits `from -> to`.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        match (from, to) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Cancelled | Self::Failed) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// One execution instance of a sync configuration.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: i64,
    pub sync_config_id: i64,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_tables: i32,
    pub completed_tables: i32,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, sync_config_id, status, start_time, end_time, total_tables, \
                       completed_tables, total_rows, processed_rows, error_message, created_at";

impl SyncJob {
    pub async fn find_by_id(id: i64, db: &MySqlPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(db)
        .await
        .with_context(|| format!("sync job {id} not found"))?;

        Ok(job)
    }

    pub async fn get(id: i64, db: &MySqlPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(job)
    }

    /// Persist a fresh submission in `pending` state.
    pub async fn insert_pending(sync_config_id: i64, db: &MySqlPool) -> Result<Self> {
        let result = sqlx::query("INSERT INTO sync_jobs (sync_config_id) VALUES (?)")
            .bind(sync_config_id)
            .execute(db)
            .await?;

        Self::find_by_id(result.last_insert_id() as i64, db).await
    }

    /// `pending -> running`, stamping the start time and table count.
    /// Returns false when the job was cancelled before a worker picked it up.
    pub async fn mark_running(id: i64, total_tables: i32, db: &MySqlPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'running', start_time = NOW(6), total_tables = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(total_tables)
        .bind(id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Partial counter update. Only the progress fields are written so a
    /// concurrent finalization cannot be clobbered.
    pub async fn update_progress(
        id: i64,
        completed_tables: i32,
        total_rows: i64,
        processed_rows: i64,
        db: &MySqlPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET completed_tables = ?, total_rows = ?, processed_rows = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(completed_tables)
        .bind(total_rows)
        .bind(processed_rows)
        .bind(id)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Move a job into a terminal state. A no-op when the job is already
    /// terminal, which is what makes cancellation idempotent.
    pub async fn finalize(
        id: i64,
        status: JobStatus,
        error: Option<&str>,
        db: &MySqlPool,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());

        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, end_time = NOW(6), error_message = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Jobs currently persisted in one state. Single-statement read, so the
    /// result is consistent with one InnoDB snapshot.
    pub async fn by_status(status: JobStatus, db: &MySqlPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_jobs WHERE status = ? ORDER BY id"
        ))
        .bind(status)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Terminal jobs, newest first.
    pub async fn history(page: Page, db: &MySqlPool) -> Result<Vec<Self>> {
        let page = page.clamped();
        let jobs = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_jobs \
             WHERE status IN ('completed', 'failed', 'cancelled') \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Delete terminal jobs older than the retention horizon. Logs cascade.
    pub async fn purge_history(retention_days: u32, db: &MySqlPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND created_at < NOW(6) - INTERVAL ? DAY
            "#,
        )
        .bind(retention_days)
        .execute(db)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn legal_transitions() {
        use JobStatus::*;
        assert!(JobStatus::can_transition(Pending, Running));
        assert!(JobStatus::can_transition(Pending, Cancelled));
        assert!(JobStatus::can_transition(Pending, Failed));
        assert!(JobStatus::can_transition(Running, Completed));
        assert!(JobStatus::can_transition(Running, Failed));
        assert!(JobStatus::can_transition(Running, Cancelled));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        use JobStatus::*;
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Pending, Running, Completed, Failed, Cancelled] {
                assert!(!JobStatus::can_transition(terminal, next));
            }
        }
    }

    #[test]
    fn no_backward_transitions() {
        use JobStatus::*;
        assert!(!JobStatus::can_transition(Running, Pending));
        assert!(!JobStatus::can_transition(Completed, Running));
    }
}

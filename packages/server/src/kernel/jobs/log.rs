//! Append-only per-job log entries.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: i64,
    pub job_id: i64,
    pub table_name: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl SyncLog {
    pub async fn append(
        job_id: i64,
        table_name: Option<&str>,
        level: LogLevel,
        message: &str,
        db: &MySqlPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_logs (job_id, table_name, level, message) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(table_name)
        .bind(level)
        .bind(message)
        .execute(db)
        .await?;

        Ok(())
    }

    /// All entries for one job in append order.
    pub async fn for_job(job_id: i64, db: &MySqlPool) -> Result<Vec<Self>> {
        let logs = sqlx::query_as::<_, Self>(
            "SELECT id, job_id, table_name, level, message, created_at \
             FROM sync_logs WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(db)
        .await?;

        Ok(logs)
    }
}

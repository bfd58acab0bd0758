//! Durable high-watermark tracking per table mapping.
//!
//! One checkpoint row per mapping: created after the first successful full
//! sync, advanced after every incremental batch, deleted only with its
//! mapping. The watermark never moves backward.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};

use super::batch::SqlValue;
use super::tracking::TrackingKind;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A typed high-watermark value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Watermark {
    Timestamp(NaiveDateTime),
    Id(i64),
}

impl Watermark {
    pub fn kind(&self) -> TrackingKind {
        match self {
            Self::Timestamp(_) => TrackingKind::Timestamp,
            Self::Id(_) => TrackingKind::AutoId,
        }
    }

    /// Serialize for the `last_sync_value` column.
    pub fn encode(&self) -> String {
        match self {
            Self::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            Self::Id(id) => id.to_string(),
        }
    }

    /// Parse a stored `last_sync_value` back into a typed watermark.
    pub fn decode(kind: TrackingKind, value: &str) -> Option<Self> {
        match kind {
            TrackingKind::Timestamp => NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
                .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(Self::Timestamp),
            TrackingKind::AutoId => value.parse::<i64>().ok().map(Self::Id),
        }
    }

    /// Lift a batch's tracking-column value into a watermark.
    pub fn from_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::DateTime(ts) => Some(Self::Timestamp(*ts)),
            SqlValue::Timestamp(ts) => Some(Self::Timestamp(ts.naive_utc())),
            SqlValue::Int(id) => Some(Self::Id(*id)),
            SqlValue::UInt(id) => i64::try_from(*id).ok().map(Self::Id),
            _ => None,
        }
    }

    /// Bindable form for the `> ?` predicate.
    pub fn to_value(self) -> SqlValue {
        match self {
            Self::Timestamp(ts) => SqlValue::DateTime(ts),
            Self::Id(id) => SqlValue::Int(id),
        }
    }

    /// Monotonic advance: the larger of the two, same-kind only.
    pub fn advanced_to(self, candidate: Watermark) -> Watermark {
        match (self, candidate) {
            (Self::Timestamp(a), Self::Timestamp(b)) => Self::Timestamp(a.max(b)),
            (Self::Id(a), Self::Id(b)) => Self::Id(a.max(b)),
            _ => self,
        }
    }
}

/// Checkpoint metadata stored alongside the watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub tracking_column: String,
    pub kind: TrackingKind,
}

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct SyncCheckpoint {
    pub mapping_id: i64,
    pub last_sync_time: DateTime<Utc>,
    pub last_sync_value: Option<String>,
    pub meta: sqlx::types::Json<CheckpointMeta>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    /// The typed watermark, when the stored value parses under the stored kind.
    pub fn watermark(&self) -> Option<Watermark> {
        let value = self.last_sync_value.as_deref()?;
        Watermark::decode(self.meta.kind, value)
    }
}

/// Load/save access to `sync_checkpoints`. Single-row atomic upserts;
/// consumed only by the sync engine.
pub struct CheckpointStore {
    db: MySqlPool,
}

impl CheckpointStore {
    pub fn new(db: MySqlPool) -> Self {
        Self { db }
    }

    pub async fn load(&self, mapping_id: i64) -> Result<Option<SyncCheckpoint>> {
        let checkpoint = sqlx::query_as::<_, SyncCheckpoint>(
            r#"
            SELECT mapping_id, last_sync_time, last_sync_value, meta, updated_at
            FROM sync_checkpoints
            WHERE mapping_id = ?
            "#,
        )
        .bind(mapping_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(checkpoint)
    }

    /// Upsert the watermark for one mapping.
    pub async fn save(
        &self,
        mapping_id: i64,
        watermark: Option<Watermark>,
        meta: &CheckpointMeta,
    ) -> Result<()> {
        let value = watermark.map(|w| w.encode());
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (mapping_id, last_sync_time, last_sync_value, meta)
            VALUES (?, NOW(6), ?, ?)
            ON DUPLICATE KEY UPDATE
                last_sync_time = NOW(6),
                last_sync_value = VALUES(last_sync_value),
                meta = VALUES(meta)
            "#,
        )
        .bind(mapping_id)
        .bind(value)
        .bind(sqlx::types::Json(meta))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn ts(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, secs)
            .unwrap()
    }

    #[test]
    fn timestamp_watermark_round_trips() {
        let mark = Watermark::Timestamp(ts(39));
        let decoded = Watermark::decode(TrackingKind::Timestamp, &mark.encode()).unwrap();
        assert_eq!(decoded, mark);
    }

    #[test]
    fn id_watermark_round_trips() {
        let mark = Watermark::Id(123_456);
        let decoded = Watermark::decode(TrackingKind::AutoId, &mark.encode()).unwrap();
        assert_eq!(decoded, mark);
    }

    #[test]
    fn decode_accepts_bare_second_precision() {
        let decoded =
            Watermark::decode(TrackingKind::Timestamp, "2024-01-01 00:01:39").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 1, 39)
            .unwrap();
        assert_eq!(decoded, Watermark::Timestamp(expected));
    }

    #[test]
    fn advance_is_monotonic() {
        let low = Watermark::Id(10);
        let high = Watermark::Id(20);
        assert_eq!(low.advanced_to(high), high);
        assert_eq!(high.advanced_to(low), high);

        let early = Watermark::Timestamp(ts(1));
        let late = Watermark::Timestamp(ts(2));
        assert_eq!(early.advanced_to(late), late);
        assert_eq!(late.advanced_to(early), late);
    }

    #[test]
    fn mismatched_kinds_do_not_advance() {
        let id = Watermark::Id(10);
        let time = Watermark::Timestamp(ts(5));
        assert_eq!(id.advanced_to(time), id);
    }

    #[test]
    fn from_value_lifts_temporal_and_integer_values() {
        assert_eq!(
            Watermark::from_value(&SqlValue::Int(7)),
            Some(Watermark::Id(7))
        );
        assert_eq!(
            Watermark::from_value(&SqlValue::DateTime(ts(3))),
            Some(Watermark::Timestamp(ts(3)))
        );
        assert_eq!(Watermark::from_value(&SqlValue::Null), None);
        assert_eq!(
            Watermark::from_value(&SqlValue::Text("x".to_string())),
            None
        );
    }
}

//! Change-tracking column discovery.
//!
//! Incremental mode needs one column that orders rows and detects change.
//! Discovery reads the target table's schema and walks a fixed priority
//! ladder: well-known timestamp names, then any temporal column whose name
//! mentions updates, then a single-column auto-increment primary key.

use anyhow::Result;
use sqlx::{FromRow, MySqlPool};

/// Well-known timestamp column names, in priority order.
const TIMESTAMP_NAMES: [&str; 5] = [
    "updated_at",
    "modified_at",
    "last_modified",
    "update_time",
    "modify_time",
];

/// One row of `information_schema.columns`.
#[derive(FromRow, Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub column_type: String,
    pub is_nullable: String,
    pub column_key: String,
    pub extra: String,
}

impl ColumnInfo {
    pub fn is_temporal(&self) -> bool {
        matches!(self.data_type.as_str(), "datetime" | "timestamp")
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "bigint"
        )
    }

    pub fn is_primary(&self) -> bool {
        self.column_key == "PRI"
    }

    pub fn is_auto_increment(&self) -> bool {
        self.extra.contains("auto_increment")
    }
}

/// How the tracking column is compared and stored in checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingKind {
    Timestamp,
    AutoId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingColumn {
    pub name: String,
    pub kind: TrackingKind,
}

/// Full column listing for one table, in ordinal position order.
pub async fn table_columns(pool: &MySqlPool, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let columns = sqlx::query_as::<_, ColumnInfo>(
        r#"
        SELECT column_name  AS name,
               data_type    AS data_type,
               column_type  AS column_type,
               is_nullable  AS is_nullable,
               column_key   AS column_key,
               extra        AS extra
        FROM information_schema.columns
        WHERE table_schema = ? AND table_name = ?
        ORDER BY ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await?;

    Ok(columns)
}

/// Pick the change-tracking column, or `None` when the table offers nothing
/// usable (the caller downgrades to a full sync for the run).
pub fn pick_tracking_column(columns: &[ColumnInfo]) -> Option<TrackingColumn> {
    // (a) well-known names, temporal type required
    for candidate in TIMESTAMP_NAMES {
        if let Some(col) = columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(candidate) && c.is_temporal())
        {
            return Some(TrackingColumn {
                name: col.name.clone(),
                kind: TrackingKind::Timestamp,
            });
        }
    }

    // (b) any temporal column whose name mentions updates
    if let Some(col) = columns
        .iter()
        .find(|c| c.is_temporal() && c.name.to_ascii_lowercase().contains("update"))
    {
        return Some(TrackingColumn {
            name: col.name.clone(),
            kind: TrackingKind::Timestamp,
        });
    }

    // (c) single-column auto-increment primary key
    let primary: Vec<_> = columns.iter().filter(|c| c.is_primary()).collect();
    if let [only] = primary.as_slice() {
        if only.is_auto_increment() && only.is_integer() {
            return Some(TrackingColumn {
                name: only.name.clone(),
                kind: TrackingKind::AutoId,
            });
        }
    }

    None
}

/// The column used to order full-sync pagination: the first primary-key
/// column, or any usable tracking column as a fallback.
pub fn pick_order_column(columns: &[ColumnInfo]) -> Option<String> {
    columns
        .iter()
        .find(|c| c.is_primary())
        .map(|c| c.name.clone())
        .or_else(|| pick_tracking_column(columns).map(|t| t.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, key: &str, extra: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            column_type: data_type.to_string(),
            is_nullable: "NO".to_string(),
            column_key: key.to_string(),
            extra: extra.to_string(),
        }
    }

    #[test]
    fn well_known_timestamp_name_wins() {
        let columns = vec![
            col("id", "bigint", "PRI", "auto_increment"),
            col("updated_at", "timestamp", "", ""),
            col("update_seq", "datetime", "", ""),
        ];
        let tracking = pick_tracking_column(&columns).unwrap();
        assert_eq!(tracking.name, "updated_at");
        assert_eq!(tracking.kind, TrackingKind::Timestamp);
    }

    #[test]
    fn name_priority_order_is_respected() {
        let columns = vec![
            col("modify_time", "datetime", "", ""),
            col("modified_at", "datetime", "", ""),
        ];
        // modified_at outranks modify_time in the ladder.
        assert_eq!(pick_tracking_column(&columns).unwrap().name, "modified_at");
    }

    #[test]
    fn temporal_update_column_is_second_choice() {
        let columns = vec![
            col("id", "bigint", "PRI", "auto_increment"),
            col("last_update_ts", "datetime", "", ""),
        ];
        let tracking = pick_tracking_column(&columns).unwrap();
        assert_eq!(tracking.name, "last_update_ts");
        assert_eq!(tracking.kind, TrackingKind::Timestamp);
    }

    #[test]
    fn well_known_name_with_wrong_type_is_skipped() {
        let columns = vec![
            col("updated_at", "varchar", "", ""),
            col("id", "bigint", "PRI", "auto_increment"),
        ];
        let tracking = pick_tracking_column(&columns).unwrap();
        assert_eq!(tracking.name, "id");
        assert_eq!(tracking.kind, TrackingKind::AutoId);
    }

    #[test]
    fn auto_increment_pk_is_last_resort() {
        let columns = vec![
            col("id", "bigint", "PRI", "auto_increment"),
            col("payload", "text", "", ""),
        ];
        let tracking = pick_tracking_column(&columns).unwrap();
        assert_eq!(tracking.name, "id");
        assert_eq!(tracking.kind, TrackingKind::AutoId);
    }

    #[test]
    fn composite_primary_key_disqualifies_auto_id() {
        let columns = vec![
            col("tenant_id", "bigint", "PRI", ""),
            col("id", "bigint", "PRI", "auto_increment"),
        ];
        assert!(pick_tracking_column(&columns).is_none());
    }

    #[test]
    fn nothing_usable_yields_none() {
        let columns = vec![col("name", "varchar", "", ""), col("body", "text", "", "")];
        assert!(pick_tracking_column(&columns).is_none());
    }

    #[test]
    fn order_column_prefers_primary_key() {
        let columns = vec![
            col("updated_at", "timestamp", "", ""),
            col("id", "bigint", "PRI", "auto_increment"),
        ];
        assert_eq!(pick_order_column(&columns).unwrap(), "id");
    }

    #[test]
    fn order_column_falls_back_to_tracking() {
        let columns = vec![col("updated_at", "timestamp", "", "")];
        assert_eq!(pick_order_column(&columns).unwrap(), "updated_at");
    }
}

//! Dynamic SQL for streaming source rows into the target.
//!
//! User tables have arbitrary schemas, so everything here works on runtime
//! column lists: `SELECT *` pages ordered by a key column, values shuttled
//! through an owned `SqlValue`, and multi-row inserts whose conflict clause
//! comes from the config's resolution policy.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, MySqlPool, Row, TypeInfo, ValueRef};

use crate::common::identifier::qualified_table;
use crate::domains::configs::ConflictResolution;
use crate::kernel::error::{SyncError, SyncResult};

/// Per-batch write deadline against the target.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Value shuttling
// ============================================================================

/// An owned MySQL scalar, decoded from a source row and bound into the
/// target insert.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    /// Decode one column of a row based on its MySQL type name.
    pub fn decode(row: &MySqlRow, index: usize) -> SyncResult<Self> {
        let raw = row
            .try_get_raw(index)
            .map_err(|e| SyncError::internal(format!("column {index}: {e}")))?;
        if raw.is_null() {
            return Ok(Self::Null);
        }
        let type_name = raw.type_info().name().to_string();
        drop(raw);

        let decoded = match type_name.as_str() {
            "BOOLEAN" => Self::Bool(row.try_get::<bool, _>(index)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                Self::Int(row.try_get::<i64, _>(index)?)
            }
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" | "YEAR" | "BIT" => Self::UInt(row.try_get::<u64, _>(index)?),
            "FLOAT" => Self::Float(row.try_get::<f32, _>(index)? as f64),
            "DOUBLE" => Self::Float(row.try_get::<f64, _>(index)?),
            "DECIMAL" => Self::Decimal(row.try_get::<Decimal, _>(index)?),
            "DATE" => Self::Date(row.try_get::<NaiveDate, _>(index)?),
            "TIME" => Self::Time(row.try_get::<NaiveTime, _>(index)?),
            "DATETIME" => Self::DateTime(row.try_get::<NaiveDateTime, _>(index)?),
            "TIMESTAMP" => Self::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
            "JSON" => Self::Json(row.try_get::<serde_json::Value, _>(index)?),
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
            | "GEOMETRY" => Self::Bytes(row.try_get::<Vec<u8>, _>(index)?),
            _ => Self::Text(row.try_get::<String, _>(index)?),
        };

        Ok(decoded)
    }

    /// Bind this value as the next `?` placeholder.
    pub fn bind_to<'q>(
        &'q self,
        query: Query<'q, MySql, MySqlArguments>,
    ) -> Query<'q, MySql, MySqlArguments> {
        match self {
            Self::Null => query.bind(Option::<i64>::None),
            Self::Bool(v) => query.bind(*v),
            Self::Int(v) => query.bind(*v),
            Self::UInt(v) => query.bind(*v),
            Self::Float(v) => query.bind(*v),
            Self::Decimal(v) => query.bind(*v),
            Self::Text(v) => query.bind(v.as_str()),
            Self::Bytes(v) => query.bind(v.as_slice()),
            Self::Date(v) => query.bind(*v),
            Self::Time(v) => query.bind(*v),
            Self::DateTime(v) => query.bind(*v),
            Self::Timestamp(v) => query.bind(*v),
            Self::Json(v) => query.bind(v.clone()),
        }
    }
}

/// One decoded batch: the source column names plus row values in column order.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Decode a page of source rows into owned values.
    pub fn decode(rows: &[MySqlRow]) -> SyncResult<Self> {
        let Some(first) = rows.first() else {
            return Ok(Self {
                columns: Vec::new(),
                rows: Vec::new(),
            });
        };

        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(SqlValue::decode(row, index)?);
            }
            decoded.push(values);
        }

        Ok(Self {
            columns,
            rows: decoded,
        })
    }

    /// The value of one named column in the last row of the batch. Batches
    /// are ordered ascending by the tracking column, so this is the maximum.
    pub fn last_value_of(&self, column: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.last().map(|row| &row[index])
    }
}

// ============================================================================
// SQL text builders
// ============================================================================

/// `SELECT COUNT(*)` over the source, with the operator filter and (for
/// incremental runs) the watermark predicate appended.
pub fn count_sql(
    schema: &str,
    table: &str,
    where_clause: Option<&str>,
    watermark_column: Option<&str>,
) -> String {
    let mut sql = format!("SELECT COUNT(*) FROM {}", qualified_table(schema, table));
    push_filters(&mut sql, where_clause, watermark_column);
    sql
}

/// Full-mode page: key-ordered `LIMIT ? OFFSET ?`.
pub fn full_select_sql(
    schema: &str,
    table: &str,
    where_clause: Option<&str>,
    order_column: Option<&str>,
) -> String {
    let mut sql = format!("SELECT * FROM {}", qualified_table(schema, table));
    push_filters(&mut sql, where_clause, None);
    if let Some(order) = order_column {
        sql.push_str(&format!(" ORDER BY `{order}`"));
    }
    sql.push_str(" LIMIT ? OFFSET ?");
    sql
}

/// Incremental-mode page: the watermark predicate advances instead of an
/// offset, so rows arriving mid-run can never be skipped by a shifting page
/// window.
pub fn incremental_select_sql(
    schema: &str,
    table: &str,
    where_clause: Option<&str>,
    tracking_column: &str,
) -> String {
    let mut sql = format!("SELECT * FROM {}", qualified_table(schema, table));
    push_filters(&mut sql, where_clause, Some(tracking_column));
    sql.push_str(&format!(" ORDER BY `{tracking_column}` LIMIT ?"));
    sql
}

fn push_filters(sql: &mut String, where_clause: Option<&str>, watermark_column: Option<&str>) {
    let mut first = true;
    if let Some(clause) = where_clause.filter(|c| !c.trim().is_empty()) {
        sql.push_str(&format!(" WHERE ({clause})"));
        first = false;
    }
    if let Some(column) = watermark_column {
        sql.push_str(if first { " WHERE " } else { " AND " });
        sql.push_str(&format!("`{column}` > ?"));
    }
}

/// Multi-row insert with the conflict clause for the configured resolution.
pub fn insert_sql(
    schema: &str,
    table: &str,
    columns: &[String],
    row_count: usize,
    conflict: ConflictResolution,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholder_row = format!("({})", vec!["?"; columns.len()].join(", "));
    let placeholders = vec![placeholder_row; row_count].join(", ");

    let verb = match conflict {
        ConflictResolution::Skip => "INSERT IGNORE INTO",
        ConflictResolution::Overwrite | ConflictResolution::Error => "INSERT INTO",
    };

    let mut sql = format!(
        "{verb} {} ({column_list}) VALUES {placeholders}",
        qualified_table(schema, table),
    );

    if conflict == ConflictResolution::Overwrite {
        let updates = columns
            .iter()
            .map(|c| format!("`{c}` = VALUES(`{c}`)"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {updates}"));
    }

    sql
}

// ============================================================================
// Execution
// ============================================================================

/// Write one decoded batch into the target under the batch timeout.
pub async fn write_batch(
    target: &MySqlPool,
    target_schema: &str,
    target_table: &str,
    batch: &RowBatch,
    conflict: ConflictResolution,
) -> SyncResult<u64> {
    if batch.is_empty() {
        return Ok(0);
    }

    let sql = insert_sql(
        target_schema,
        target_table,
        &batch.columns,
        batch.len(),
        conflict,
    );

    let mut query = sqlx::query(&sql);
    for row in &batch.rows {
        for value in row {
            query = value.bind_to(query);
        }
    }

    let result = tokio::time::timeout(BATCH_TIMEOUT, query.execute(target))
        .await
        .map_err(|_| {
            SyncError::target_unwritable(
                target_table,
                format!("batch write exceeded {}s", BATCH_TIMEOUT.as_secs()),
            )
        })?;

    match result {
        Ok(done) => Ok(done.rows_affected()),
        Err(e) if SyncError::is_duplicate_key(&e) && conflict == ConflictResolution::Error => {
            Err(SyncError::conflict(target_table, e.to_string()))
        }
        Err(e) => {
            if let sqlx::Error::Database(db) = &e {
                // 1054 = ER_BAD_FIELD_ERROR: target lacks a source column.
                if db.code().as_deref() == Some("1054")
                    || db.message().contains("Unknown column")
                {
                    return Err(SyncError::schema_mismatch(target_table, db.message()));
                }
            }
            Err(SyncError::target_unwritable(target_table, e.to_string()))
        }
    }
}

/// Verify every source column exists on the target before the first write.
pub fn check_column_coverage(
    table: &str,
    source_columns: &[String],
    target_columns: &[String],
) -> SyncResult<()> {
    for column in source_columns {
        if !target_columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return Err(SyncError::schema_mismatch(
                table,
                format!("target is missing column `{column}`"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_sql_with_filter_and_watermark() {
        assert_eq!(
            count_sql("shop", "events", Some("tenant_id = 4"), Some("updated_at")),
            "SELECT COUNT(*) FROM `shop`.`events` WHERE (tenant_id = 4) AND `updated_at` > ?"
        );
        assert_eq!(
            count_sql("shop", "events", None, None),
            "SELECT COUNT(*) FROM `shop`.`events`"
        );
        assert_eq!(
            count_sql("shop", "events", None, Some("id")),
            "SELECT COUNT(*) FROM `shop`.`events` WHERE `id` > ?"
        );
    }

    #[test]
    fn full_select_orders_and_pages() {
        assert_eq!(
            full_select_sql("shop", "users", None, Some("id")),
            "SELECT * FROM `shop`.`users` ORDER BY `id` LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn full_select_without_key_still_pages() {
        assert_eq!(
            full_select_sql("shop", "audit", Some("kind = 'x'"), None),
            "SELECT * FROM `shop`.`audit` WHERE (kind = 'x') LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn incremental_select_advances_by_predicate() {
        assert_eq!(
            incremental_select_sql("shop", "events", None, "updated_at"),
            "SELECT * FROM `shop`.`events` WHERE `updated_at` > ? ORDER BY `updated_at` LIMIT ?"
        );
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn skip_uses_insert_ignore() {
        let sql = insert_sql("rep", "users", &columns(&["id", "name"]), 2, ConflictResolution::Skip);
        assert_eq!(
            sql,
            "INSERT IGNORE INTO `rep`.`users` (`id`, `name`) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn overwrite_appends_duplicate_key_update() {
        let sql = insert_sql(
            "rep",
            "users",
            &columns(&["id", "name"]),
            1,
            ConflictResolution::Overwrite,
        );
        assert_eq!(
            sql,
            "INSERT INTO `rep`.`users` (`id`, `name`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `id` = VALUES(`id`), `name` = VALUES(`name`)"
        );
    }

    #[test]
    fn error_policy_is_a_plain_insert() {
        let sql = insert_sql("rep", "users", &columns(&["id"]), 3, ConflictResolution::Error);
        assert_eq!(sql, "INSERT INTO `rep`.`users` (`id`) VALUES (?), (?), (?)");
    }

    #[test]
    fn coverage_check_flags_missing_target_column() {
        let source = columns(&["id", "name", "total"]);
        let target = columns(&["id", "name"]);
        let err = check_column_coverage("orders", &source, &target).unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("total"));
    }

    #[test]
    fn coverage_check_is_case_insensitive() {
        let source = columns(&["ID", "Name"]);
        let target = columns(&["id", "name", "extra"]);
        assert!(check_column_coverage("users", &source, &target).is_ok());
    }

    #[test]
    fn last_value_of_returns_max_of_ordered_batch() {
        let batch = RowBatch {
            columns: columns(&["id", "updated_at"]),
            rows: vec![
                vec![SqlValue::Int(1), SqlValue::Int(100)],
                vec![SqlValue::Int(2), SqlValue::Int(200)],
            ],
        };
        assert_eq!(batch.last_value_of("updated_at"), Some(&SqlValue::Int(200)));
        assert_eq!(batch.last_value_of("missing"), None);
    }
}

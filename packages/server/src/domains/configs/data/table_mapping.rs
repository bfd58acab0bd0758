//! CRUD for table mappings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::common::sql::Record;

use super::super::models::TableMapping;

const COLUMNS: &str = "id, sync_config_id, source_table, target_table, mode, enabled, \
                       where_clause, ordinal, created_at, updated_at";

impl TableMapping {
    /// Enabled mappings for one config in deterministic execution order.
    pub async fn enabled_for_config(sync_config_id: i64, db: &MySqlPool) -> Result<Vec<Self>> {
        let mappings = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM table_mappings \
             WHERE sync_config_id = ? AND enabled = TRUE \
             ORDER BY ordinal, id"
        ))
        .bind(sync_config_id)
        .fetch_all(db)
        .await?;

        Ok(mappings)
    }

    pub async fn for_config(sync_config_id: i64, db: &MySqlPool) -> Result<Vec<Self>> {
        let mappings = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM table_mappings \
             WHERE sync_config_id = ? ORDER BY ordinal, id"
        ))
        .bind(sync_config_id)
        .fetch_all(db)
        .await?;

        Ok(mappings)
    }
}

#[async_trait]
impl Record for TableMapping {
    const TABLE: &'static str = "table_mappings";

    async fn find_by_id(id: i64, db: &MySqlPool) -> Result<Self> {
        let mapping = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM table_mappings WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(db)
        .await
        .with_context(|| format!("table mapping {id} not found"))?;

        Ok(mapping)
    }

    async fn insert(&self, db: &MySqlPool) -> Result<Self> {
        let result = sqlx::query(
            r#"
            INSERT INTO table_mappings
                (sync_config_id, source_table, target_table, mode, enabled,
                 where_clause, ordinal)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.sync_config_id)
        .bind(&self.source_table)
        .bind(&self.target_table)
        .bind(self.mode)
        .bind(self.enabled)
        .bind(&self.where_clause)
        .bind(self.ordinal)
        .execute(db)
        .await?;

        Self::find_by_id(result.last_insert_id() as i64, db).await
    }

    async fn update(&self, db: &MySqlPool) -> Result<Self> {
        sqlx::query(
            r#"
            UPDATE table_mappings
            SET source_table = ?, target_table = ?, mode = ?, enabled = ?,
                where_clause = ?, ordinal = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.source_table)
        .bind(&self.target_table)
        .bind(self.mode)
        .bind(self.enabled)
        .bind(&self.where_clause)
        .bind(self.ordinal)
        .bind(self.id)
        .execute(db)
        .await?;

        Self::find_by_id(self.id, db).await
    }

    async fn delete(&self, db: &MySqlPool) -> Result<()> {
        sqlx::query("DELETE FROM table_mappings WHERE id = ?")
            .bind(self.id)
            .execute(db)
            .await?;

        Ok(())
    }
}

//! CRUD for sync configurations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::common::sql::Record;

use super::super::models::SyncConfig;

const COLUMNS: &str = "id, name, source_connection_id, target_connection_id, source_schema, \
                       target_schema, default_mode, schedule, enabled, options, \
                       created_at, updated_at";

impl SyncConfig {
    pub async fn list_all(db: &MySqlPool) -> Result<Vec<Self>> {
        let configs = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_configs ORDER BY id"
        ))
        .fetch_all(db)
        .await?;

        Ok(configs)
    }

    pub async fn find_by_name(name: &str, db: &MySqlPool) -> Result<Option<Self>> {
        let config = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_configs WHERE name = ? LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(db)
        .await?;

        Ok(config)
    }
}

#[async_trait]
impl Record for SyncConfig {
    const TABLE: &'static str = "sync_configs";

    async fn find_by_id(id: i64, db: &MySqlPool) -> Result<Self> {
        let config = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM sync_configs WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(db)
        .await
        .with_context(|| format!("sync config {id} not found"))?;

        Ok(config)
    }

    async fn insert(&self, db: &MySqlPool) -> Result<Self> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_configs
                (name, source_connection_id, target_connection_id, source_schema,
                 target_schema, default_mode, schedule, enabled, options)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.name)
        .bind(self.source_connection_id)
        .bind(self.target_connection_id)
        .bind(&self.source_schema)
        .bind(&self.target_schema)
        .bind(self.default_mode)
        .bind(&self.schedule)
        .bind(self.enabled)
        .bind(&self.options)
        .execute(db)
        .await?;

        Self::find_by_id(result.last_insert_id() as i64, db).await
    }

    async fn update(&self, db: &MySqlPool) -> Result<Self> {
        sqlx::query(
            r#"
            UPDATE sync_configs
            SET name = ?, source_connection_id = ?, target_connection_id = ?,
                source_schema = ?, target_schema = ?, default_mode = ?,
                schedule = ?, enabled = ?, options = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.name)
        .bind(self.source_connection_id)
        .bind(self.target_connection_id)
        .bind(&self.source_schema)
        .bind(&self.target_schema)
        .bind(self.default_mode)
        .bind(&self.schedule)
        .bind(self.enabled)
        .bind(&self.options)
        .bind(self.id)
        .execute(db)
        .await?;

        Self::find_by_id(self.id, db).await
    }

    async fn delete(&self, db: &MySqlPool) -> Result<()> {
        sqlx::query("DELETE FROM sync_configs WHERE id = ?")
            .bind(self.id)
            .execute(db)
            .await?;

        Ok(())
    }
}

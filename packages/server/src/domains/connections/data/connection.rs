//! CRUD for connection descriptors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::common::sql::Record;

use super::super::models::Connection;

const COLUMNS: &str = "id, name, host, port, username, password, db_schema, use_ssl, \
                       created_at, updated_at";

impl Connection {
    pub async fn find_by_name(name: &str, db: &MySqlPool) -> Result<Option<Self>> {
        let conn = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM connections WHERE name = ? LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(db)
        .await?;

        Ok(conn)
    }

    pub async fn list_all(db: &MySqlPool) -> Result<Vec<Self>> {
        let conns = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM connections ORDER BY id"
        ))
        .fetch_all(db)
        .await?;

        Ok(conns)
    }
}

#[async_trait]
impl Record for Connection {
    const TABLE: &'static str = "connections";

    async fn find_by_id(id: i64, db: &MySqlPool) -> Result<Self> {
        let conn = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM connections WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(db)
        .await
        .with_context(|| format!("connection {id} not found"))?;

        Ok(conn)
    }

    async fn insert(&self, db: &MySqlPool) -> Result<Self> {
        let result = sqlx::query(
            r#"
            INSERT INTO connections (name, host, port, username, password, db_schema, use_ssl)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.name)
        .bind(&self.host)
        .bind(self.port)
        .bind(&self.username)
        .bind(&self.password)
        .bind(&self.db_schema)
        .bind(self.use_ssl)
        .execute(db)
        .await?;

        Self::find_by_id(result.last_insert_id() as i64, db).await
    }

    async fn update(&self, db: &MySqlPool) -> Result<Self> {
        sqlx::query(
            r#"
            UPDATE connections
            SET name = ?, host = ?, port = ?, username = ?, password = ?,
                db_schema = ?, use_ssl = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.name)
        .bind(&self.host)
        .bind(self.port)
        .bind(&self.username)
        .bind(&self.password)
        .bind(&self.db_schema)
        .bind(self.use_ssl)
        .bind(self.id)
        .execute(db)
        .await?;

        Self::find_by_id(self.id, db).await
    }

    async fn delete(&self, db: &MySqlPool) -> Result<()> {
        sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(self.id)
            .execute(db)
            .await?;

        Ok(())
    }
}

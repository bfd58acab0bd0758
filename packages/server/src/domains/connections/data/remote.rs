//! Introspection queries against a registered endpoint.
//!
//! These run on the *remote* server's pool, not the metadata store.

use anyhow::Result;
use sqlx::MySqlPool;

/// Schemas a sync can read from or write to. System schemas are hidden.
pub async fn list_remote_schemas(pool: &MySqlPool) -> Result<Vec<String>> {
    let schemas = sqlx::query_scalar::<_, String>(
        r#"
        SELECT schema_name
        FROM information_schema.schemata
        WHERE schema_name NOT IN
              ('information_schema', 'performance_schema', 'mysql', 'sys')
        ORDER BY schema_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(schemas)
}

/// Base tables in one schema (views are excluded; they cannot be sync targets).
pub async fn list_remote_tables(pool: &MySqlPool, schema: &str) -> Result<Vec<String>> {
    let tables = sqlx::query_scalar::<_, String>(
        r#"
        SELECT table_name
        FROM information_schema.tables
        WHERE table_schema = ? AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await?;

    Ok(tables)
}

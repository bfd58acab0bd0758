//! Connection management and remote introspection handlers.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;

use crate::common::is_valid_identifier;
use crate::common::sql::Record;
use crate::domains::connections::data::{list_remote_schemas, list_remote_tables};
use crate::domains::connections::{Connection, ConnectionSettings, ConnectionStatus};
use crate::kernel::error::SyncError;
use crate::kernel::pool::ConnectionPool;
use crate::kernel::sync::tracking;
use crate::server::app::{ApiError, ApiResult, AppState};

#[derive(Deserialize)]
pub struct ConnectionPayload {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub use_ssl: bool,
}

fn default_port() -> u16 {
    3306
}

impl ConnectionPayload {
    fn into_model(self, id: i64) -> Connection {
        Connection {
            id,
            name: self.name,
            host: self.host,
            port: self.port,
            username: self.username,
            password: self.password,
            db_schema: self.schema,
            use_ssl: self.use_ssl,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}

pub async fn list(Extension(state): Extension<AppState>) -> ApiResult<Json<Vec<Connection>>> {
    let connections = Connection::list_all(&state.kernel.db).await?;
    Ok(Json(connections))
}

pub async fn show(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Connection>> {
    let connection = Connection::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("connection", id))?;
    Ok(Json(connection))
}

pub async fn create(
    Extension(state): Extension<AppState>,
    Json(payload): Json<ConnectionPayload>,
) -> ApiResult<Json<Connection>> {
    let connection = payload.into_model(0);
    connection.validate().map_err(ApiError::bad_request)?;

    if Connection::find_by_name(&connection.name, &state.kernel.db)
        .await?
        .is_some()
    {
        return Err(ApiError::bad_request(format!(
            "connection name `{}` is already taken",
            connection.name
        )));
    }

    let created = connection.insert(&state.kernel.db).await?;
    Ok(Json(created))
}

pub async fn update(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ConnectionPayload>,
) -> ApiResult<Json<Connection>> {
    // 404 on unknown id before writing anything.
    Connection::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("connection", id))?;

    let connection = payload.into_model(id);
    connection.validate().map_err(ApiError::bad_request)?;

    let updated = connection.update(&state.kernel.db).await?;
    // Credentials may have changed; drop any pooled sessions.
    state.kernel.pools.evict(id).await;
    Ok(Json(updated))
}

pub async fn destroy(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let connection = Connection::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("connection", id))?;

    connection.delete(&state.kernel.db).await?;
    state.kernel.pools.evict(id).await;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Probe a stored connection. Serves a fresh cache entry when one exists.
pub async fn test(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ConnectionStatus>> {
    if let Some(status) = state.kernel.status_cache.get(id).await {
        return Ok(Json(status));
    }

    let connection = Connection::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("connection", id))?;
    let status = ConnectionPool::test(&connection.settings()).await;
    Ok(Json(status))
}

/// Probe an unsaved connection config.
pub async fn test_inline(
    Json(settings): Json<ConnectionSettings>,
) -> ApiResult<Json<ConnectionStatus>> {
    Ok(Json(ConnectionPool::test(&settings).await))
}

pub async fn schemas(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<String>>> {
    let pool = state.kernel.pools.acquire(id).await?;
    let schemas = list_remote_schemas(&pool).await?;
    Ok(Json(schemas))
}

#[derive(Deserialize)]
pub struct SchemaQuery {
    pub schema: String,
}

pub async fn tables(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<SchemaQuery>,
) -> ApiResult<Json<Vec<String>>> {
    if !is_valid_identifier(&query.schema) {
        return Err(ApiError::bad_request("invalid schema name"));
    }
    let pool = state.kernel.pools.acquire(id).await?;
    let tables = list_remote_tables(&pool, &query.schema).await?;
    Ok(Json(tables))
}

#[derive(serde::Serialize)]
pub struct ColumnResponse {
    pub name: String,
    pub data_type: String,
    pub column_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

pub async fn columns(
    Extension(state): Extension<AppState>,
    Path((id, table)): Path<(i64, String)>,
    Query(query): Query<SchemaQuery>,
) -> ApiResult<Json<Vec<ColumnResponse>>> {
    if !is_valid_identifier(&query.schema) || !is_valid_identifier(&table) {
        return Err(ApiError::bad_request("invalid schema or table name"));
    }

    let pool = state.kernel.pools.acquire(id).await?;
    let columns = tracking::table_columns(&pool, &query.schema, &table).await?;

    Ok(Json(
        columns
            .into_iter()
            .map(|c| ColumnResponse {
                nullable: c.is_nullable == "YES",
                primary_key: c.is_primary(),
                auto_increment: c.is_auto_increment(),
                name: c.name,
                data_type: c.data_type,
                column_type: c.column_type,
            })
            .collect(),
    ))
}

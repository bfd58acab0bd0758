//! Sync config and table mapping handlers.

use axum::extract::{Extension, Path};
use axum::Json;
use serde::Deserialize;

use crate::common::sql::Record;
use crate::domains::configs::{SyncConfig, SyncMode, SyncOptions, TableMapping};
use crate::kernel::error::SyncError;
use crate::server::app::{ApiError, ApiResult, AppState};

#[derive(Deserialize)]
pub struct ConfigPayload {
    pub name: String,
    pub source_connection_id: i64,
    pub target_connection_id: i64,
    pub source_schema: String,
    pub target_schema: String,
    #[serde(default)]
    pub default_mode: SyncMode,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Omitted options fall back to the server-wide defaults.
    #[serde(default)]
    pub options: Option<SyncOptions>,
}

fn default_enabled() -> bool {
    true
}

impl ConfigPayload {
    fn into_model(self, id: i64, default_batch_size: u32) -> SyncConfig {
        let options = self.options.unwrap_or(SyncOptions {
            batch_size: default_batch_size,
            ..Default::default()
        });
        SyncConfig {
            id,
            name: self.name,
            source_connection_id: self.source_connection_id,
            target_connection_id: self.target_connection_id,
            source_schema: self.source_schema,
            target_schema: self.target_schema,
            default_mode: self.default_mode,
            schedule: self.schedule,
            enabled: self.enabled,
            options: sqlx::types::Json(options.clamped()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}

pub async fn list(Extension(state): Extension<AppState>) -> ApiResult<Json<Vec<SyncConfig>>> {
    Ok(Json(SyncConfig::list_all(&state.kernel.db).await?))
}

pub async fn show(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SyncConfig>> {
    let config = SyncConfig::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("sync config", id))?;
    Ok(Json(config))
}

pub async fn create(
    Extension(state): Extension<AppState>,
    Json(payload): Json<ConfigPayload>,
) -> ApiResult<Json<SyncConfig>> {
    let config = payload.into_model(0, state.engine.config.default_batch_size);
    config.validate().map_err(ApiError::bad_request)?;

    if SyncConfig::find_by_name(&config.name, &state.kernel.db)
        .await?
        .is_some()
    {
        return Err(ApiError::bad_request(format!(
            "config name `{}` is already taken",
            config.name
        )));
    }

    Ok(Json(config.insert(&state.kernel.db).await?))
}

pub async fn update(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ConfigPayload>,
) -> ApiResult<Json<SyncConfig>> {
    SyncConfig::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("sync config", id))?;

    let config = payload.into_model(id, state.engine.config.default_batch_size);
    config.validate().map_err(ApiError::bad_request)?;

    Ok(Json(config.update(&state.kernel.db).await?))
}

pub async fn destroy(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let config = SyncConfig::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("sync config", id))?;

    config.delete(&state.kernel.db).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============================================================================
// Table mappings
// ============================================================================

#[derive(Deserialize)]
pub struct MappingPayload {
    pub source_table: String,
    pub target_table: String,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub ordinal: i32,
}

impl MappingPayload {
    fn into_model(self, id: i64, sync_config_id: i64) -> TableMapping {
        TableMapping {
            id,
            sync_config_id,
            source_table: self.source_table,
            target_table: self.target_table,
            mode: self.mode,
            enabled: self.enabled,
            where_clause: self.where_clause,
            ordinal: self.ordinal,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}

pub async fn list_mappings(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<TableMapping>>> {
    SyncConfig::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("sync config", id))?;
    Ok(Json(TableMapping::for_config(id, &state.kernel.db).await?))
}

pub async fn create_mapping(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<MappingPayload>,
) -> ApiResult<Json<TableMapping>> {
    SyncConfig::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("sync config", id))?;

    let mapping = payload.into_model(0, id);
    mapping.validate().map_err(ApiError::bad_request)?;

    Ok(Json(mapping.insert(&state.kernel.db).await?))
}

pub async fn show_mapping(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TableMapping>> {
    let mapping = TableMapping::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("table mapping", id))?;
    Ok(Json(mapping))
}

pub async fn update_mapping(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<MappingPayload>,
) -> ApiResult<Json<TableMapping>> {
    let existing = TableMapping::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("table mapping", id))?;

    let mapping = payload.into_model(id, existing.sync_config_id);
    mapping.validate().map_err(ApiError::bad_request)?;

    Ok(Json(mapping.update(&state.kernel.db).await?))
}

pub async fn destroy_mapping(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let mapping = TableMapping::find_by_id(id, &state.kernel.db)
        .await
        .map_err(|_| SyncError::not_found("table mapping", id))?;

    mapping.delete(&state.kernel.db).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============================================================================
// Submission
// ============================================================================

/// Submit a job for this config. Returns the job id.
pub async fn submit_sync(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let job_id = state.engine.submit_job(id).await?;
    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

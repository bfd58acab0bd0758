//! Job control and observation handlers.

use axum::extract::{Extension, Path, Query};
use axum::Json;

use crate::common::Page;
use crate::kernel::jobs::{SyncJob, SyncLog};
use crate::kernel::monitoring::{JobSummary, SyncStatistics};
use crate::server::app::{ApiResult, AppState};

pub async fn show(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SyncJob>> {
    Ok(Json(state.engine.get_job(id).await?))
}

pub async fn cancel(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.cancel_job(id).await?;
    Ok(Json(serde_json::json!({ "cancelled": id })))
}

pub async fn logs(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<SyncLog>>> {
    // 404 before reading logs so unknown ids do not return an empty list.
    state.engine.get_job(id).await?;
    let logs = state.kernel.monitoring.get_job_logs(id).await?;
    Ok(Json(logs))
}

/// Snapshot of the in-memory ledger.
pub async fn active(Extension(state): Extension<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.kernel.monitoring.get_active_jobs())
}

pub async fn history(
    Extension(state): Extension<AppState>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<SyncJob>>> {
    let jobs = state.kernel.monitoring.get_sync_history(page).await?;
    Ok(Json(jobs))
}

pub async fn statistics(
    Extension(state): Extension<AppState>,
) -> ApiResult<Json<SyncStatistics>> {
    let stats = state.kernel.monitoring.get_statistics().await?;
    Ok(Json(stats))
}

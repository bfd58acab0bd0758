//! Application setup and router.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::error::SyncError;
use crate::kernel::jobs::JobEngine;
use crate::kernel::SyncKernel;
use crate::server::routes;

/// Shared handler state. Both fields are process-wide singletons owned by
/// `main`; handlers only ever clone the `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<SyncKernel>,
    pub engine: Arc<JobEngine>,
}

/// Error envelope returned by every handler.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::Configuration(_) => StatusCode::BAD_REQUEST,
            SyncError::ConfigDisabled(_) => StatusCode::CONFLICT,
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::EngineNotRunning => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            SyncError::ConnectionUnavailable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_handler))
        // Connections
        .route(
            "/api/connections",
            get(routes::connections::list).post(routes::connections::create),
        )
        .route(
            "/api/connections/test",
            post(routes::connections::test_inline),
        )
        .route(
            "/api/connections/:id",
            get(routes::connections::show)
                .put(routes::connections::update)
                .delete(routes::connections::destroy),
        )
        .route("/api/connections/:id/test", post(routes::connections::test))
        .route(
            "/api/connections/:id/schemas",
            get(routes::connections::schemas),
        )
        .route(
            "/api/connections/:id/tables",
            get(routes::connections::tables),
        )
        .route(
            "/api/connections/:id/tables/:table/columns",
            get(routes::connections::columns),
        )
        // Sync configs and mappings
        .route(
            "/api/configs",
            get(routes::configs::list).post(routes::configs::create),
        )
        .route(
            "/api/configs/:id",
            get(routes::configs::show)
                .put(routes::configs::update)
                .delete(routes::configs::destroy),
        )
        .route(
            "/api/configs/:id/mappings",
            get(routes::configs::list_mappings).post(routes::configs::create_mapping),
        )
        .route(
            "/api/configs/:id/sync",
            post(routes::configs::submit_sync),
        )
        .route(
            "/api/mappings/:id",
            get(routes::configs::show_mapping)
                .put(routes::configs::update_mapping)
                .delete(routes::configs::destroy_mapping),
        )
        // Jobs
        .route("/api/jobs/active", get(routes::jobs::active))
        .route("/api/jobs/history", get(routes::jobs::history))
        .route("/api/jobs/statistics", get(routes::jobs::statistics))
        .route("/api/jobs/:id", get(routes::jobs::show))
        .route("/api/jobs/:id/cancel", post(routes::jobs::cancel))
        .route("/api/jobs/:id/logs", get(routes::jobs::logs))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

//! dbferry server binary.
//!
//! Wires the metadata database, the kernel singletons, the job engine, the
//! health checker, and the HTTP adapter, then runs until shutdown.

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server_core::config::Config;
use server_core::kernel::health::HealthChecker;
use server_core::kernel::jobs::{EngineConfig, JobEngine};
use server_core::kernel::service::ServiceHost;
use server_core::kernel::SyncKernel;
use server_core::server::app::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting dbferry server");

    let config = Config::from_env()?;

    // Metadata database
    let db = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to metadata database")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run migrations")?;

    // Kernel singletons: one Monitoring, one ConnectionPool, one status cache.
    let kernel = SyncKernel::new(db.clone());

    let (engine, engine_service) = JobEngine::new(
        db.clone(),
        std::sync::Arc::clone(&kernel.pools),
        std::sync::Arc::clone(&kernel.monitoring),
        EngineConfig::from_config(&config),
    );

    let health = HealthChecker::new(db, std::sync::Arc::clone(&kernel.status_cache));

    // HTTP adapter
    let state = AppState {
        kernel: std::sync::Arc::clone(&kernel),
        engine: std::sync::Arc::clone(&engine),
    };
    let router = app::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("HTTP server listening on {addr}");

    let host = ServiceHost::new()
        .with_service(engine_service)
        .with_service(health);
    let shutdown = host.shutdown_token();

    tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "http server exited");
        }
    });

    host.run_until_shutdown().await
}

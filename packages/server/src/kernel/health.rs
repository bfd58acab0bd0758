//! Periodic liveness probing of registered connections.
//!
//! One background service probes every known connection each tick and keeps
//! the latest result in a shared cache. Cache entries older than the
//! freshness window are treated as unknown by readers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::MySqlPool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domains::connections::{Connection, ConnectionStatus};
use crate::kernel::pool::ConnectionPool;
use crate::kernel::service::Service;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

/// Latest probe results keyed by connection id. Shared between the checker
/// and the read path.
#[derive(Default)]
pub struct StatusCache {
    entries: RwLock<HashMap<i64, ConnectionStatus>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh status for one connection, if the last probe is recent enough.
    pub async fn get(&self, connection_id: i64) -> Option<ConnectionStatus> {
        let entries = self.entries.read().await;
        entries
            .get(&connection_id)
            .filter(|status| {
                let age = Utc::now().signed_duration_since(status.checked_at);
                age.to_std().map(|a| a <= FRESHNESS_WINDOW).unwrap_or(true)
            })
            .cloned()
    }

    /// Every fresh entry, for the dashboard overview.
    pub async fn snapshot(&self) -> HashMap<i64, ConnectionStatus> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, status)| {
                let age = Utc::now().signed_duration_since(status.checked_at);
                age.to_std().map(|a| a <= FRESHNESS_WINDOW).unwrap_or(true)
            })
            .map(|(id, status)| (*id, status.clone()))
            .collect()
    }

    async fn put(&self, connection_id: i64, status: ConnectionStatus) {
        self.entries.write().await.insert(connection_id, status);
    }

    async fn previous_connected(&self, connection_id: i64) -> Option<bool> {
        self.entries
            .read()
            .await
            .get(&connection_id)
            .map(|s| s.connected)
    }
}

/// Background service probing all registered connections every 30 seconds.
pub struct HealthChecker {
    db: MySqlPool,
    cache: Arc<StatusCache>,
}

impl HealthChecker {
    pub fn new(db: MySqlPool, cache: Arc<StatusCache>) -> Self {
        Self { db, cache }
    }

    async fn probe_all(&self) {
        let connections = match Connection::list_all(&self.db).await {
            Ok(connections) => connections,
            Err(e) => {
                warn!(error = %e, "health checker could not list connections");
                return;
            }
        };

        let probes = connections.into_iter().map(|conn| {
            let cache = Arc::clone(&self.cache);
            async move {
                let status = ConnectionPool::test(&conn.settings()).await;

                // One log line per up/down transition, not per probe.
                let previous = cache.previous_connected(conn.id).await;
                match (previous, status.connected) {
                    (Some(false) | None, true) => {
                        info!(connection_id = conn.id, name = %conn.name, "connection is up");
                    }
                    (Some(true) | None, false) => {
                        warn!(
                            connection_id = conn.id,
                            name = %conn.name,
                            error = status.error.as_deref().unwrap_or("unknown"),
                            "connection is down"
                        );
                    }
                    _ => {}
                }

                cache.put(conn.id, status).await;
            }
        });

        futures::future::join_all(probes).await;
    }
}

#[async_trait::async_trait]
impl Service for HealthChecker {
    fn name(&self) -> &'static str {
        "health-checker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        loop {
            self.probe_all().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
            }
        }

        Ok(())
    }
}

//! Connection pooling for registered endpoints.
//!
//! One sqlx pool per connection id, cached for reuse across jobs and health
//! probes. Pools are built lazily on first acquire and evicted on deletion
//! or confirmed failure.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::common::sql::Record;
use crate::domains::connections::{Connection, ConnectionSettings, ConnectionStatus};
use crate::kernel::error::{SyncError, SyncResult};

const MAX_OPEN_PER_CONNECTION: u32 = 10;
const MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);
const MAX_IDLE_TIME: Duration = Duration::from_secs(5 * 60);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out shared pooled handles keyed by connection id.
pub struct ConnectionPool {
    /// Metadata store holding the `connections` table.
    db: MySqlPool,
    pools: RwLock<HashMap<i64, MySqlPool>>,
}

impl ConnectionPool {
    pub fn new(db: MySqlPool) -> Self {
        Self {
            db,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Shared pooled handle for a registered connection. Verifies liveness
    /// when the pool is first built; a ping failure evicts and surfaces
    /// `ConnectionUnavailable`.
    pub async fn acquire(&self, connection_id: i64) -> SyncResult<MySqlPool> {
        if let Some(pool) = self.pools.read().await.get(&connection_id) {
            return Ok(pool.clone());
        }

        let conn = Connection::find_by_id(connection_id, &self.db)
            .await
            .map_err(|_| SyncError::not_found("connection", connection_id))?;

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_OPEN_PER_CONNECTION)
            .min_connections(0)
            .max_lifetime(MAX_LIFETIME)
            .idle_timeout(MAX_IDLE_TIME)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(&conn.settings().url())
            .map_err(|e| SyncError::connection_unavailable(connection_id, e.to_string()))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(SyncError::connection_unavailable(
                connection_id,
                e.to_string(),
            ));
        }

        let mut pools = self.pools.write().await;
        // A racing acquire may have built the pool already; keep the first.
        let pool = pools.entry(connection_id).or_insert(pool).clone();
        debug!(connection_id, "pool ready");

        Ok(pool)
    }

    /// Open a transient session, run `SELECT VERSION()`, close. Used by the
    /// health checker and the `TestConnection` verb.
    pub async fn test(settings: &ConnectionSettings) -> ConnectionStatus {
        let started = Instant::now();

        let pool = match MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(TEST_TIMEOUT)
            .connect(&settings.url())
            .await
        {
            Ok(pool) => pool,
            Err(e) => return ConnectionStatus::down(e.to_string()),
        };

        let status = match sqlx::query_scalar::<_, String>("SELECT VERSION()")
            .fetch_one(&pool)
            .await
        {
            Ok(version) => {
                ConnectionStatus::up(started.elapsed().as_millis() as u64, version)
            }
            Err(e) => ConnectionStatus::down(e.to_string()),
        };

        pool.close().await;
        status
    }

    /// Close and discard the pooled handle for one connection.
    pub async fn evict(&self, connection_id: i64) {
        let pool = self.pools.write().await.remove(&connection_id);
        if let Some(pool) = pool {
            info!(connection_id, "evicting pooled connection");
            pool.close().await;
        }
    }

    /// Close every pooled session. Called once at shutdown.
    pub async fn close(&self) {
        let pools: Vec<_> = self.pools.write().await.drain().collect();
        for (connection_id, pool) in pools {
            debug!(connection_id, "closing pool");
            pool.close().await;
        }
    }

    /// Ids of connections that currently hold a cached pool.
    pub async fn cached_ids(&self) -> Vec<i64> {
        self.pools.read().await.keys().copied().collect()
    }
}

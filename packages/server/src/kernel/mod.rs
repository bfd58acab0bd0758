//! The sync execution core: pools, health, monitoring, jobs, sync engine.

pub mod error;
pub mod health;
pub mod jobs;
pub mod monitoring;
pub mod pool;
pub mod service;
pub mod sync;

use std::sync::Arc;

use sqlx::MySqlPool;

use health::StatusCache;
use monitoring::{Monitoring, MySqlMonitorStore};
use pool::ConnectionPool;

/// Shared kernel state: the metadata pool plus the process-wide singletons.
///
/// `Monitoring` is allocated here and nowhere else; the job engine and the
/// HTTP adapter both receive clones of this one `Arc`, which is what makes
/// a second, divergent ledger impossible by construction.
pub struct SyncKernel {
    pub db: MySqlPool,
    pub pools: Arc<ConnectionPool>,
    pub monitoring: Arc<Monitoring>,
    pub status_cache: Arc<StatusCache>,
}

impl SyncKernel {
    pub fn new(db: MySqlPool) -> Arc<Self> {
        let monitoring = Arc::new(Monitoring::new(MySqlMonitorStore::new(db.clone())));
        let pools = Arc::new(ConnectionPool::new(db.clone()));
        let status_cache = Arc::new(StatusCache::new());

        Arc::new(Self {
            db,
            pools,
            monitoring,
            status_cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kernel_shares_one_monitoring_instance() {
        let db = MySqlPool::connect_lazy("mysql://user:pw@localhost:3306/meta").unwrap();
        let kernel = SyncKernel::new(db);

        // Everything downstream must alias the kernel's ledger.
        let for_engine = Arc::clone(&kernel.monitoring);
        let for_api = Arc::clone(&kernel.monitoring);
        assert!(Arc::ptr_eq(&for_engine, &for_api));
        assert!(Arc::ptr_eq(&for_engine, &kernel.monitoring));
    }
}

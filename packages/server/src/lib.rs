//! dbferry: row replication between MySQL-compatible databases.
//!
//! The library is organized the way the process runs:
//!
//! ```text
//! submission -> JobEngine queue -> worker dequeues
//!     -> loads SyncConfig + TableMappings
//!     -> ConnectionPool opens source + target
//!     -> SyncEngine streams batches per mapping
//!         -> Monitoring tracks progress, CheckpointStore advances watermarks
//!     -> job finalized, Monitoring archives
//! ```
//!
//! - [`kernel`] is the sync execution core: pools, health, the monitoring
//!   ledger, the job engine, and the per-table sync engine.
//! - [`domains`] holds the configuration entities (connections, sync
//!   configs, table mappings) with their CRUD.
//! - [`server`] is the thin axum adapter over the core.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub mod data;
pub mod models;

pub use models::{
    ConflictResolution, DatabaseMapping, SyncConfig, SyncMode, SyncOptions, TableMapping,
};

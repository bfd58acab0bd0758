mod database_mapping;
mod sync_config;
mod table_mapping;

pub use database_mapping::DatabaseMapping;
pub use sync_config::{ConflictResolution, SyncConfig, SyncMode, SyncOptions};
pub use table_mapping::TableMapping;

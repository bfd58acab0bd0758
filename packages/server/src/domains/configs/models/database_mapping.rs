//! Schema-pair override model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Optional per-config schema override. When a row exists for a config's
/// source schema, the worker replicates into the mapped target schema
/// instead of the config's default pair.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMapping {
    pub id: i64,
    pub sync_config_id: i64,
    pub source_schema: String,
    pub target_schema: String,
    pub created_at: DateTime<Utc>,
}

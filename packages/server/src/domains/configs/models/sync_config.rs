//! Sync configuration model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use typed_builder::TypedBuilder;

/// Replication mode for a config or a single table mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    Incremental,
}

/// What to do when a target row already exists under the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// `INSERT IGNORE` - existing target rows win.
    #[default]
    Skip,
    /// `INSERT ... ON DUPLICATE KEY UPDATE` - source rows win.
    Overwrite,
    /// Plain `INSERT` - a duplicate key aborts the table.
    Error,
}

pub const MIN_BATCH_SIZE: u32 = 100;
pub const MAX_BATCH_SIZE: u32 = 10_000;
pub const DEFAULT_BATCH_SIZE: u32 = 1_000;
pub const MIN_CONCURRENCY: u32 = 1;
pub const MAX_CONCURRENCY: u32 = 20;
pub const DEFAULT_CONCURRENCY: u32 = 5;

/// Per-config execution options, stored as a JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub batch_size: u32,
    pub max_concurrency: u32,
    pub conflict_resolution: ConflictResolution,
    /// Persisted for the UI; wire compression is a connection-URL concern and
    /// has no engine effect.
    pub enable_compression: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_CONCURRENCY,
            conflict_resolution: ConflictResolution::default(),
            enable_compression: false,
        }
    }
}

impl SyncOptions {
    /// Clamp every numeric knob into its allowed range. Out-of-range values
    /// never reach the executor.
    pub fn clamped(self) -> Self {
        Self {
            batch_size: self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            max_concurrency: self.max_concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
            ..self
        }
    }
}

/// A sync configuration: one source/target schema pair plus options.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct SyncConfig {
    #[builder(default = 0)]
    pub id: i64,

    pub name: String,
    pub source_connection_id: i64,
    pub target_connection_id: i64,
    pub source_schema: String,
    pub target_schema: String,

    #[builder(default)]
    pub default_mode: SyncMode,
    /// Cron-style schedule, interpreted by an external scheduler.
    #[builder(default, setter(strip_option))]
    pub schedule: Option<String>,
    #[builder(default = true)]
    pub enabled: bool,

    #[builder(default = Json(SyncOptions::default()))]
    pub options: Json<SyncOptions>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl SyncConfig {
    pub fn options(&self) -> SyncOptions {
        self.options.0.clone().clamped()
    }

    /// Structural validation applied before insert/update and before any job
    /// is submitted for this config.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("config name must not be empty".to_string());
        }
        if self.source_schema.is_empty() || self.target_schema.is_empty() {
            return Err("source and target schemas must be set".to_string());
        }
        if self.source_connection_id == self.target_connection_id
            && self.source_schema == self.target_schema
        {
            return Err(
                "source and target may not be the same schema on the same connection".to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SyncConfig {
        SyncConfig::builder()
            .name("orders-replica")
            .source_connection_id(1i64)
            .target_connection_id(2i64)
            .source_schema("shop")
            .target_schema("shop_replica")
            .build()
    }

    #[test]
    fn default_options_match_documented_defaults() {
        let opts = SyncOptions::default();
        assert_eq!(opts.batch_size, 1_000);
        assert_eq!(opts.max_concurrency, 5);
        assert_eq!(opts.conflict_resolution, ConflictResolution::Skip);
        assert!(!opts.enable_compression);
    }

    #[test]
    fn clamp_pulls_batch_size_into_range() {
        let opts = SyncOptions {
            batch_size: 7,
            ..Default::default()
        };
        assert_eq!(opts.clamped().batch_size, 100);

        let opts = SyncOptions {
            batch_size: 1_000_000,
            ..Default::default()
        };
        assert_eq!(opts.clamped().batch_size, 10_000);
    }

    #[test]
    fn clamp_pulls_concurrency_into_range() {
        let opts = SyncOptions {
            max_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(opts.clamped().max_concurrency, 1);

        let opts = SyncOptions {
            max_concurrency: 99,
            ..Default::default()
        };
        assert_eq!(opts.clamped().max_concurrency, 20);
    }

    #[test]
    fn options_survive_json_round_trip_with_missing_fields() {
        let opts: SyncOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, SyncOptions::default());

        let opts: SyncOptions =
            serde_json::from_str(r#"{"conflict_resolution":"overwrite"}"#).unwrap();
        assert_eq!(opts.conflict_resolution, ConflictResolution::Overwrite);
        assert_eq!(opts.batch_size, 1_000);
    }

    #[test]
    fn same_connection_same_schema_is_rejected() {
        let mut config = sample_config();
        config.target_connection_id = config.source_connection_id;
        config.target_schema = config.source_schema.clone();
        assert!(config.validate().is_err());

        // Same connection but different schema is allowed.
        let mut config = sample_config();
        config.target_connection_id = config.source_connection_id;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }
}

//! Table mapping model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::is_valid_identifier;

use super::SyncMode;

/// One `(source_table -> target_table)` pair inside a sync config.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct TableMapping {
    #[builder(default = 0)]
    pub id: i64,

    pub sync_config_id: i64,
    pub source_table: String,
    pub target_table: String,

    #[builder(default)]
    pub mode: SyncMode,
    #[builder(default = true)]
    pub enabled: bool,

    /// Free-form SQL appended to the source query. Trusted operator input;
    /// the system does not parse or escape it.
    #[builder(default, setter(strip_option))]
    pub where_clause: Option<String>,

    /// Execution order inside a job; mappings run strictly ascending.
    #[builder(default = 0)]
    pub ordinal: i32,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl TableMapping {
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_identifier(&self.source_table) {
            return Err(format!("invalid source table name `{}`", self.source_table));
        }
        if !is_valid_identifier(&self.target_table) {
            return Err(format!("invalid target table name `{}`", self.target_table));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mapping() -> TableMapping {
        TableMapping::builder()
            .sync_config_id(1i64)
            .source_table("users")
            .target_table("users")
            .build()
    }

    #[test]
    fn new_mapping_defaults_to_full_mode() {
        let mapping = sample_mapping();
        assert_eq!(mapping.mode, SyncMode::Full);
        assert!(mapping.enabled);
        assert_eq!(mapping.ordinal, 0);
    }

    #[test]
    fn rejects_bad_target_identifier() {
        let mut mapping = sample_mapping();
        mapping.target_table = "users; drop table users".to_string();
        assert!(mapping.validate().is_err());
    }

    #[test]
    fn accepts_plain_identifiers() {
        assert!(sample_mapping().validate().is_ok());
    }
}

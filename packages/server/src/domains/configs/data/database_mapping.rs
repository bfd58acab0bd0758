//! Queries for schema-pair overrides.

use anyhow::Result;
use sqlx::MySqlPool;

use super::super::models::DatabaseMapping;

impl DatabaseMapping {
    pub async fn for_config(sync_config_id: i64, db: &MySqlPool) -> Result<Vec<Self>> {
        let mappings = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, sync_config_id, source_schema, target_schema, created_at
            FROM database_mappings
            WHERE sync_config_id = ?
            ORDER BY id
            "#,
        )
        .bind(sync_config_id)
        .fetch_all(db)
        .await?;

        Ok(mappings)
    }

    /// The effective schema pair for a config: an override row wins over the
    /// config's default pair.
    pub fn resolve_pair<'a>(
        overrides: &'a [DatabaseMapping],
        source_schema: &'a str,
        target_schema: &'a str,
    ) -> (&'a str, &'a str) {
        for mapping in overrides {
            if mapping.source_schema == source_schema {
                return (&mapping.source_schema, &mapping.target_schema);
            }
        }
        (source_schema, target_schema)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn mapping(source: &str, target: &str) -> DatabaseMapping {
        DatabaseMapping {
            id: 1,
            sync_config_id: 1,
            source_schema: source.to_string(),
            target_schema: target.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn override_wins_over_default_pair() {
        let overrides = vec![mapping("shop", "shop_archive")];
        let (src, dst) = DatabaseMapping::resolve_pair(&overrides, "shop", "shop_replica");
        assert_eq!(src, "shop");
        assert_eq!(dst, "shop_archive");
    }

    #[test]
    fn no_override_keeps_config_pair() {
        let overrides = vec![mapping("billing", "billing_replica")];
        let (src, dst) = DatabaseMapping::resolve_pair(&overrides, "shop", "shop_replica");
        assert_eq!(src, "shop");
        assert_eq!(dst, "shop_replica");
    }
}

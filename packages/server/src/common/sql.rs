//! Record trait for CRUD operations.
//!
//! Simple trait for database models that need standard operations against
//! the metadata store. MySQL has no `RETURNING`, so writes execute and then
//! re-read the row.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;

/// Trait for database records with CRUD operations.
#[async_trait]
pub trait Record: Sized + Send + Sync {
    /// The table name for this record type.
    const TABLE: &'static str;

    /// Find a record by its ID.
    async fn find_by_id(id: i64, db: &MySqlPool) -> Result<Self>;

    /// Insert a new record, returning the stored row.
    async fn insert(&self, db: &MySqlPool) -> Result<Self>;

    /// Update an existing record, returning the stored row.
    async fn update(&self, db: &MySqlPool) -> Result<Self>;

    /// Delete a record.
    async fn delete(&self, db: &MySqlPool) -> Result<()>;
}

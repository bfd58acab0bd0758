//! Structured error taxonomy for the sync core.
//!
//! `SyncError` is the typed boundary between the engine and its callers:
//! the data layer and effects use `anyhow` internally, but everything that
//! crosses the kernel surface is one of these kinds so the HTTP adapter and
//! the job finalizer can match on it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Validation failure of a connection, config, or mapping. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Source or target refused or timed out.
    #[error("connection {connection_id} unavailable: {detail}")]
    ConnectionUnavailable { connection_id: i64, detail: String },

    /// A source read (count or page fetch) failed.
    #[error("source read failed on `{table}`: {detail}")]
    SourceUnreadable { table: String, detail: String },

    /// A target write failed for a reason other than schema or key conflicts.
    #[error("target write failed on `{table}`: {detail}")]
    TargetUnwritable { table: String, detail: String },

    /// Target lacks a column present in the source, or an incompatible type
    /// surfaced at write time. Aborts the table, not the job.
    #[error("schema mismatch on `{table}`: {detail}")]
    SchemaMismatch { table: String, detail: String },

    /// Duplicate key under `conflict_resolution = error`. Aborts the table.
    #[error("conflict on `{table}`: {detail}")]
    Conflict { table: String, detail: String },

    /// The job's cancellation token fired. Not an operator-facing error.
    #[error("cancelled")]
    Cancelled,

    /// Submission arrived while the engine was not running.
    #[error("engine is not running")]
    EngineNotRunning,

    /// Submission against a disabled sync configuration.
    #[error("sync config {0} is disabled")]
    ConfigDisabled(i64),

    /// The dispatcher queue stayed full past the submission deadline.
    #[error("engine overloaded: queue full")]
    Overloaded,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Defects: serialization, invariant violations, unexpected driver state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    pub fn connection_unavailable(connection_id: i64, detail: impl Into<String>) -> Self {
        Self::ConnectionUnavailable {
            connection_id,
            detail: detail.into(),
        }
    }

    pub fn source_unreadable(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            table: table.into(),
            detail: detail.into(),
        }
    }

    pub fn target_unwritable(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TargetUnwritable {
            table: table.into(),
            detail: detail.into(),
        }
    }

    pub fn schema_mismatch(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            detail: detail.into(),
        }
    }

    pub fn conflict(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            table: table.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// Whether the batch retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. }
                | Self::SourceUnreadable { .. }
                | Self::TargetUnwritable { .. }
                | Self::Internal(_)
        )
    }

    /// Whether a duplicate-key database error lurks behind this error.
    pub fn is_duplicate_key(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => {
                // 1062 = ER_DUP_ENTRY, 1586 = ER_DUP_ENTRY_WITH_KEY_NAME
                matches!(db.code().as_deref(), Some("23000") | Some("1062") | Some("1586"))
                    || db.is_unique_violation()
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Internal(format!("database unavailable: {err}"))
            }
            sqlx::Error::RowNotFound => Self::Internal("row not found".to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(SyncError::connection_unavailable(1, "refused").is_retryable());
        assert!(SyncError::source_unreadable("users", "gone away").is_retryable());
        assert!(SyncError::target_unwritable("users", "lock wait").is_retryable());
        assert!(SyncError::internal("boom").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::configuration("bad batch size").is_retryable());
        assert!(!SyncError::schema_mismatch("users", "missing col").is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = SyncError::schema_mismatch("orders", "target lacks `total`");
        assert_eq!(
            err.to_string(),
            "schema mismatch on `orders`: target lacks `total`"
        );
    }
}

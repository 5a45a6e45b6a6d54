//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure. Engine failures
//! raised inside a public operation are wrapped in [`StorageError::Operation`]
//! so callers always learn which call failed, whatever internal step broke.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Input rejected before touching storage (bad pod name, namespace,
    /// numeric field, pod type, export format or timestamp).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Every pooled connection is in use.
    #[error("connection pool exhausted: all {max} connections are in use")]
    PoolExhausted {
        /// Configured maximum number of connections.
        max: u32,
    },

    /// The pool has been shut down with `close_all`.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A named storage operation failed in the engine.
    #[error("{operation} failed: {source}")]
    Operation {
        /// Public operation that failed (e.g. `store_pod_data`).
        operation: &'static str,
        /// Underlying engine error.
        #[source]
        source: rusqlite::Error,
    },

    /// Engine error outside any named operation (open, schema setup).
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., failed directory creation).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Attach the failing operation name to a raw engine error.
    ///
    /// Validation, pool and already-wrapped errors pass through unchanged.
    pub(crate) fn in_operation(self, operation: &'static str) -> Self {
        match self {
            Self::Database(source) => Self::Operation { operation, source },
            other => other,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } => true,
            Self::Operation { source, .. } | Self::Database(source) => matches!(
                source.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Name of the failed operation, if the error was raised inside one.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Operation { operation, .. } => Some(operation),
            _ => None,
        }
    }
}

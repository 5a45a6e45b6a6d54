//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing all storage facades.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::storage::StorageError;
use crate::storage::admin::StorageAdmin;
use crate::storage::pool::{
    ConnectionPool, DEFAULT_BUSY_TIMEOUT, DEFAULT_CACHE_SIZE, DEFAULT_MAX_CONNECTIONS, PoolOptions,
};
use crate::storage::reader::HistoryReader;
use crate::storage::schema::init_schema;
use crate::storage::writer::SnapshotWriter;
use crate::telemetry::OpRateTracker;

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    db_path: PathBuf,
    max_connections: u32,
    busy_timeout: Duration,
    cache_size: i64,
}

impl StorageBuilder {
    /// Create a new storage builder with default pool settings
    /// (5 connections, 5 s busy timeout, 10,000 cache pages).
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    /// Set the maximum number of open connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set how long a connection waits on a locked database.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the per-connection page cache size.
    pub fn cache_size(mut self, pages: i64) -> Self {
        self.cache_size = pages;
        self
    }

    /// Build the storage layer and return handles.
    ///
    /// Creates the parent directory if needed, opens the pool and ensures the
    /// schema exists.
    pub fn build(self) -> Result<StorageHandles, StorageError> {
        if self.max_connections == 0 {
            return Err(StorageError::Validation(
                "max_connections must be at least 1".to_string(),
            ));
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = ConnectionPool::new(
            &self.db_path,
            PoolOptions {
                max_connections: self.max_connections,
                busy_timeout: self.busy_timeout,
                cache_size: self.cache_size,
            },
        );
        {
            let conn = pool.acquire()?;
            init_schema(&conn)?;
        }

        let rate = Arc::new(OpRateTracker::new());
        tracing::info!(
            path = %self.db_path.display(),
            max_connections = self.max_connections,
            "Storage opened"
        );

        Ok(StorageHandles {
            writer: SnapshotWriter::new(Arc::clone(&pool), Arc::clone(&rate)),
            reader: HistoryReader::new(Arc::clone(&pool), Arc::clone(&rate)),
            admin: StorageAdmin::new(Arc::clone(&pool), Arc::clone(&rate)),
            rate,
            pool,
            shut_down: false,
        })
    }
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Snapshot, deactivation and event writes.
    pub writer: SnapshotWriter,
    /// History, timeline, pod list and export queries.
    pub reader: HistoryReader,
    /// Retention, statistics and checkpoints.
    pub admin: StorageAdmin,
    rate: Arc<OpRateTracker>,
    pool: Arc<ConnectionPool>,
    shut_down: bool,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Shared connection pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Storage operations per second over the trailing minute.
    pub fn ops_per_sec(&self) -> f64 {
        self.rate.ops_per_sec()
    }

    /// Gracefully shutdown the storage layer.
    ///
    /// Checkpoints the write-ahead log, then closes every pooled connection.
    /// A failed checkpoint is logged; the pool is closed regardless.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(e) = self.admin.checkpoint() {
            tracing::warn!(error = %e, "WAL checkpoint on shutdown failed");
        }
        self.pool.close_all();
        tracing::info!("Storage closed");
    }
}

impl Drop for StorageHandles {
    fn drop(&mut self) {
        self.close();
    }
}

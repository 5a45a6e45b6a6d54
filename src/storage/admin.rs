//! Retention, statistics and maintenance.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::storage::StorageError;
use crate::storage::normalize::clamp_retention_days;
use crate::storage::pool::ConnectionPool;
use crate::storage::types::{CleanupReport, DatabaseStats};
use crate::storage::writer::write_transaction;
use crate::telemetry::{OpRateTracker, observe};

/// Storage administration.
#[derive(Clone)]
pub struct StorageAdmin {
    pool: Arc<ConnectionPool>,
    rate: Arc<OpRateTracker>,
}

impl fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAdmin").finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(pool: Arc<ConnectionPool>, rate: Arc<OpRateTracker>) -> Self {
        Self { pool, rate }
    }

    /// Delete snapshots and events older than `retention_days`, then compact
    /// the database file.
    ///
    /// The retention period is clamped to `[1, 365]`. Both deletes commit
    /// together. Compaction runs afterwards as a separate pool checkout, made
    /// only after the delete has committed and its handle has been returned.
    /// That checkout may hand back the same physical handle. A failed
    /// `VACUUM` is logged and reported as `compacted = false` without failing
    /// the call.
    pub fn cleanup_old_data(&self, retention_days: i64) -> Result<CleanupReport, StorageError> {
        const OP: &str = "cleanup_old_data";
        observe(&self.rate, OP, || {
            let retention_days = clamp_retention_days(retention_days);
            let cutoff = (Utc::now() - Duration::days(retention_days)).timestamp_micros();

            let (history_records_deleted, events_deleted) = {
                let mut conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
                write_transaction(&mut conn, |tx| {
                    let history =
                        tx.execute("DELETE FROM pod_history WHERE timestamp < ?1", params![cutoff])?;
                    let events =
                        tx.execute("DELETE FROM pod_events WHERE timestamp < ?1", params![cutoff])?;
                    Ok((history, events))
                })
                .map_err(|source| StorageError::Operation { operation: OP, source })?
            };

            tracing::info!(
                retention_days,
                history_records_deleted,
                events_deleted,
                "Old history removed"
            );

            let compacted = match self.compact() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Database compaction failed after cleanup");
                    false
                }
            };

            Ok(CleanupReport {
                history_records_deleted,
                events_deleted,
                retention_days,
                compacted,
            })
        })
    }

    /// Aggregate statistics. Never fails: on error the counters stay at zero,
    /// `healthy` is false and `error` holds the cause.
    pub fn get_database_stats(&self) -> DatabaseStats {
        const OP: &str = "get_database_stats";
        let result = observe(&self.rate, OP, || self.collect_stats());
        let mut stats = result.unwrap_or_else(|e| DatabaseStats {
            healthy: false,
            error: Some(e.in_operation(OP).to_string()),
            ..Default::default()
        });
        stats.db_operations_per_sec = self.rate.ops_per_sec();
        stats.pool = Some(self.pool.status());
        stats
    }

    /// Fold the write-ahead log back into the main database file.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        const OP: &str = "checkpoint";
        observe(&self.rate, OP, || {
            let conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            let (busy, log_frames, checkpointed): (i64, i64, i64) = conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(|source| StorageError::Operation { operation: OP, source })?;
            tracing::debug!(busy, log_frames, checkpointed, "WAL checkpoint completed");
            Ok(())
        })
    }

    /// `VACUUM` on a freshly checked-out handle. Any committed handle will do;
    /// the call fails if a transaction is open on it.
    fn compact(&self) -> Result<(), StorageError> {
        let conn = self.pool.acquire()?;
        conn.execute_batch("VACUUM")?;
        tracing::debug!("Database compacted");
        Ok(())
    }

    fn collect_stats(&self) -> Result<DatabaseStats, StorageError> {
        let conn = self.pool.acquire()?;

        let (total_records, active_records, oldest, newest): (i64, i64, Option<i64>, Option<i64>) =
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_active), 0), MIN(timestamp), MAX(timestamp)
                 FROM pod_history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let total_events: i64 =
            conn.query_row("SELECT COUNT(*) FROM pod_events", [], |row| row.get(0))?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            total_records,
            total_events,
            active_records,
            oldest_timestamp: oldest.and_then(DateTime::from_timestamp_micros),
            newest_timestamp: newest.and_then(DateTime::from_timestamp_micros),
            size_bytes: page_count.saturating_mul(page_size),
            healthy: journal_mode.eq_ignore_ascii_case("wal"),
            journal_mode: Some(journal_mode),
            error: None,
            db_operations_per_sec: 0.0,
            pool: None,
        })
    }
}

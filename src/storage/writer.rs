//! Ingestion facade.
//!
//! [`SnapshotWriter`] validates and normalizes poller output, then writes it
//! through the connection pool:
//!
//! - single-pod inserts ([`SnapshotWriter::store_pod_data`])
//! - poll-round batches sharing one timestamp, committed atomically
//!   ([`SnapshotWriter::store_pod_data_batch`])
//! - lifecycle deactivation ([`SnapshotWriter::mark_pods_inactive`])
//! - event logging ([`SnapshotWriter::log_pod_event`])

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior, params};

use crate::storage::StorageError;
use crate::storage::normalize::{
    NormalizedSnapshot, normalize_raw_row, normalize_snapshot, sanitize_pod_name,
    truncate_message, validate_namespace,
};
use crate::storage::pool::ConnectionPool;
use crate::storage::types::{PodDescriptor, PodType, RawSnapshotRow, ResourceSpec, ResourceUsage};
use crate::telemetry::{OpRateTracker, observe};

const INSERT_SNAPSHOT_SQL: &str = "
INSERT INTO pod_history (
    timestamp, namespace, pod_name, pod_type, app_name, status,
    cpu_request, cpu_limit, cpu_usage,
    memory_request, memory_limit, memory_usage,
    node_name, creation_timestamp, labels, annotations,
    container_restarts, is_active
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 1)";

/// Deactivates every active row whose name is absent from the JSON array in ?3.
const DEACTIVATE_SQL: &str = "
UPDATE pod_history
SET is_active = 0, deletion_timestamp = ?1
WHERE namespace = ?2
  AND is_active = 1
  AND pod_name NOT IN (SELECT value FROM json_each(?3))";

const INSERT_EVENT_SQL: &str = "
INSERT INTO pod_events (
    timestamp, namespace, pod_name, event_type, event_reason, event_message, app_name
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// Snapshot and event writer.
#[derive(Clone)]
pub struct SnapshotWriter {
    pool: Arc<ConnectionPool>,
    rate: Arc<OpRateTracker>,
}

impl fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotWriter").finish_non_exhaustive()
    }
}

impl SnapshotWriter {
    pub(crate) fn new(pool: Arc<ConnectionPool>, rate: Arc<OpRateTracker>) -> Self {
        Self { pool, rate }
    }

    /// Store one observation of one pod as a new active snapshot row.
    ///
    /// Returns the id of the inserted row.
    ///
    /// # Errors
    /// [`StorageError::Validation`] for a bad namespace, pod name or numeric
    /// field; [`StorageError::PoolExhausted`]; [`StorageError::Operation`]
    /// for engine failures.
    pub fn store_pod_data(
        &self,
        namespace: &str,
        pod: &PodDescriptor,
        pod_type: PodType,
        app_name: &str,
        resources: &ResourceSpec,
        usage: &ResourceUsage,
    ) -> Result<i64, StorageError> {
        const OP: &str = "store_pod_data";
        observe(&self.rate, OP, || {
            let row = normalize_snapshot(namespace, pod, pod_type, app_name, resources, usage)?;
            let now = Utc::now().timestamp_micros();

            let mut conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            let id = write_transaction(&mut conn, |tx| insert_snapshot(tx, &row, now))
                .map_err(|source| StorageError::Operation { operation: OP, source })?;

            tracing::debug!(id, namespace = %row.namespace, pod_name = %row.pod_name, "Snapshot stored");
            Ok(id)
        })
    }

    /// Store one poll round.
    ///
    /// Every row is normalized before storage is touched; one invalid row
    /// rejects the whole batch. All rows share a single capture timestamp and
    /// are committed in one transaction, so readers never see half a round.
    ///
    /// Returns the number of rows inserted.
    ///
    /// # Errors
    /// Same as [`store_pod_data`](Self::store_pod_data). On any error no row
    /// of the batch is persisted.
    pub fn store_pod_data_batch(&self, rows: &[RawSnapshotRow]) -> Result<usize, StorageError> {
        const OP: &str = "store_pod_data_batch";
        observe(&self.rate, OP, || {
            if rows.is_empty() {
                return Ok(0);
            }

            let normalized = rows
                .iter()
                .map(normalize_raw_row)
                .collect::<Result<Vec<_>, _>>()?;
            let now = Utc::now().timestamp_micros();

            let mut conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            write_transaction(&mut conn, |tx| {
                for row in &normalized {
                    insert_snapshot(tx, row, now)?;
                }
                Ok(())
            })
            .map_err(|source| StorageError::Operation { operation: OP, source })?;

            tracing::debug!(count = normalized.len(), "Snapshot batch inserted");
            Ok(normalized.len())
        })
    }

    /// Deactivate every active pod in `namespace` that is absent from
    /// `active_pod_names`.
    ///
    /// `active_pod_names` must be the complete set observed in the current
    /// round: an empty slice deactivates every active row in the namespace.
    /// Matching rows get `is_active = 0` and `deletion_timestamp = now` in a
    /// single statement. Returns the number of rows changed.
    ///
    /// # Errors
    /// [`StorageError::Validation`] for a bad namespace or name;
    /// [`StorageError::Operation`] for engine failures.
    pub fn mark_pods_inactive(
        &self,
        namespace: &str,
        active_pod_names: &[String],
    ) -> Result<usize, StorageError> {
        const OP: &str = "mark_pods_inactive";
        observe(&self.rate, OP, || {
            let namespace = validate_namespace(namespace)?;
            let names = active_pod_names
                .iter()
                .map(|name| sanitize_pod_name(name))
                .collect::<Result<Vec<_>, _>>()?;
            let names_json = serde_json::to_string(&names)?;
            let now = Utc::now().timestamp_micros();

            let mut conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            let changed = write_transaction(&mut conn, |tx| {
                tx.execute(DEACTIVATE_SQL, params![now, namespace, names_json])
            })
            .map_err(|source| StorageError::Operation { operation: OP, source })?;

            if changed > 0 {
                tracing::info!(namespace = %namespace, changed, active = names.len(), "Pods marked inactive");
            }
            Ok(changed)
        })
    }

    /// Append one lifecycle event. The message is truncated to 1000
    /// characters.
    ///
    /// Returns the id of the inserted event.
    ///
    /// # Errors
    /// [`StorageError::Validation`] for a bad namespace, pod name or empty
    /// event type; [`StorageError::Operation`] for engine failures.
    pub fn log_pod_event(
        &self,
        namespace: &str,
        pod_name: &str,
        event_type: &str,
        reason: &str,
        message: &str,
        app_name: &str,
    ) -> Result<i64, StorageError> {
        const OP: &str = "log_pod_event";
        observe(&self.rate, OP, || {
            let namespace = validate_namespace(namespace)?;
            let pod_name = sanitize_pod_name(pod_name)?;
            let event_type = event_type.trim();
            if event_type.is_empty() {
                return Err(StorageError::Validation(
                    "event type cannot be empty".to_string(),
                ));
            }
            let message = truncate_message(message);
            let now = Utc::now().timestamp_micros();

            let mut conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            let id = write_transaction(&mut conn, |tx| {
                tx.execute(
                    INSERT_EVENT_SQL,
                    params![now, namespace, pod_name, event_type, reason, message, app_name],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .map_err(|source| StorageError::Operation { operation: OP, source })?;

            tracing::debug!(id, namespace = %namespace, pod_name = %pod_name, event_type, "Pod event logged");
            Ok(id)
        })
    }
}

/// Run `f` inside an IMMEDIATE transaction: committed on success, rolled back
/// when `f` fails or the transaction is dropped.
pub(crate) fn write_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

fn insert_snapshot(
    conn: &Connection,
    row: &NormalizedSnapshot,
    timestamp: i64,
) -> rusqlite::Result<i64> {
    let mut stmt = conn.prepare_cached(INSERT_SNAPSHOT_SQL)?;
    stmt.execute(params![
        timestamp,
        row.namespace,
        row.pod_name,
        row.pod_type.as_ref(),
        row.app_name,
        row.status,
        row.cpu_request,
        row.cpu_limit,
        row.cpu_usage,
        row.memory_request,
        row.memory_limit,
        row.memory_usage,
        row.node_name,
        row.creation_timestamp,
        row.labels,
        row.annotations,
        row.container_restarts,
    ])?;
    Ok(conn.last_insert_rowid())
}

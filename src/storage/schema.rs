//! Database schema definitions and migrations.
//!
//! Two append-only tables: `pod_history` (resource snapshots) and `pod_events`
//! (lifecycle events). Timestamps are stored as UTC microseconds since the
//! epoch. Everything here is create-if-absent, so [`init_schema`] is safe to
//! run on every startup.

use rusqlite::Connection;

use crate::storage::StorageError;

/// SQL statement for creating the pod_history table (snapshot rows).
///
/// CHECK constraints duplicate the ingestion-side validation.
/// Note: labels/annotations are canonical sorted-key JSON objects.
pub const POD_HISTORY_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS pod_history (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp          INTEGER NOT NULL,
    namespace          TEXT NOT NULL,
    pod_name           TEXT NOT NULL,
    pod_type           TEXT NOT NULL CHECK (pod_type IN ('driver', 'executor')),
    app_name           TEXT NOT NULL,
    status             TEXT NOT NULL,
    cpu_request        REAL NOT NULL DEFAULT 0 CHECK (cpu_request >= 0),
    cpu_limit          REAL NOT NULL DEFAULT 0 CHECK (cpu_limit >= 0),
    cpu_usage          REAL NOT NULL DEFAULT 0 CHECK (cpu_usage >= 0),
    memory_request     REAL NOT NULL DEFAULT 0 CHECK (memory_request >= 0),
    memory_limit       REAL NOT NULL DEFAULT 0 CHECK (memory_limit >= 0),
    memory_usage       REAL NOT NULL DEFAULT 0 CHECK (memory_usage >= 0),
    node_name          TEXT,
    creation_timestamp INTEGER,
    deletion_timestamp INTEGER,
    labels             TEXT NOT NULL DEFAULT '{}',
    annotations        TEXT NOT NULL DEFAULT '{}',
    container_restarts INTEGER NOT NULL DEFAULT 0 CHECK (container_restarts >= 0),
    is_active          INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1))
);
"#;

/// Indexes on pod_history, one per query shape.
pub const POD_HISTORY_INDEXES_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_pod_name ON pod_history(pod_name);
CREATE INDEX IF NOT EXISTS idx_timestamp ON pod_history(timestamp);
CREATE INDEX IF NOT EXISTS idx_app_name ON pod_history(app_name);
CREATE INDEX IF NOT EXISTS idx_pod_type ON pod_history(pod_type);
CREATE INDEX IF NOT EXISTS idx_ns_ts ON pod_history(namespace, timestamp);
CREATE INDEX IF NOT EXISTS idx_ns_pod ON pod_history(namespace, pod_name);
CREATE INDEX IF NOT EXISTS idx_ns_active ON pod_history(namespace, is_active);
CREATE INDEX IF NOT EXISTS idx_ns_app_ts ON pod_history(namespace, app_name, timestamp);
"#;

/// SQL statement for creating the pod_events table.
///
/// Linked to pod_history by (namespace, pod_name) only; no foreign key.
pub const POD_EVENTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS pod_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     INTEGER NOT NULL,
    namespace     TEXT NOT NULL,
    pod_name      TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    event_reason  TEXT,
    event_message TEXT,
    app_name      TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_ns_pod ON pod_events(namespace, pod_name);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON pod_events(timestamp);
"#;

/// Initialize the database schema.
///
/// Creates both tables and all indexes if they don't exist.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(POD_HISTORY_TABLE_DDL)?;
    conn.execute_batch(POD_HISTORY_INDEXES_DDL)?;
    conn.execute_batch(POD_EVENTS_TABLE_DDL)?;

    tracing::info!("Database schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_count(conn: &Connection, kind: &str, name: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(object_count(&conn, "table", "pod_history"), 1);
        assert_eq!(object_count(&conn, "table", "pod_events"), 1);

        for index in [
            "idx_pod_name",
            "idx_timestamp",
            "idx_app_name",
            "idx_pod_type",
            "idx_ns_ts",
            "idx_ns_pod",
            "idx_ns_active",
            "idx_ns_app_ts",
            "idx_events_ns_pod",
            "idx_events_timestamp",
        ] {
            assert_eq!(object_count(&conn, "index", index), 1, "missing {index}");
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO pod_events (timestamp, namespace, pod_name, event_type)
             VALUES (1, 'ns', 'pod', 'created')",
            [],
        )
        .unwrap();

        // Second run must neither fail nor drop existing rows
        init_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM pod_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_check_constraints_reject_bad_rows() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let bad_type = conn.execute(
            "INSERT INTO pod_history (timestamp, namespace, pod_name, pod_type, app_name, status)
             VALUES (1, 'ns', 'pod', 'sidecar', 'app', 'Running')",
            [],
        );
        assert!(bad_type.is_err());

        let negative_cpu = conn.execute(
            "INSERT INTO pod_history (timestamp, namespace, pod_name, pod_type, app_name, status, cpu_usage)
             VALUES (1, 'ns', 'pod', 'driver', 'app', 'Running', -1.0)",
            [],
        );
        assert!(negative_cpu.is_err());

        let ok = conn.execute(
            "INSERT INTO pod_history (timestamp, namespace, pod_name, pod_type, app_name, status)
             VALUES (1, 'ns', 'pod', 'executor', 'app', 'Running')",
            [],
        );
        assert_eq!(ok.unwrap(), 1);

        let active: i64 = conn
            .query_row("SELECT is_active FROM pod_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(active, 1);
    }
}

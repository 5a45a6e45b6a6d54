//! Integration Tests for the pod history store
//!
//! Exercises ingestion, lifecycle, retention, queries, export and the
//! connection pool through the public API only.

use std::thread;

use chrono::{Duration, Utc};
use rusqlite::params;
use serde_json::{Value, json};
use sparkmon::StorageBuilder;
use sparkmon::storage::{
    ExportFormat, PodDescriptor, PodType, RawSnapshotRow, ResourceSpec, ResourceUsage,
    StorageError, StorageHandles,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Open a fresh store in a temporary directory.
fn open_store() -> (TempDir, StorageHandles) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let handles = StorageBuilder::new(dir.path().join("history.db"))
        .build()
        .expect("Failed to build storage");
    (dir, handles)
}

fn row(namespace: &str, pod_name: &str, pod_type: &str, app: &str) -> RawSnapshotRow {
    RawSnapshotRow {
        namespace: namespace.to_string(),
        pod_name: pod_name.to_string(),
        pod_type: pod_type.to_string(),
        app_name: app.to_string(),
        status: "Running".to_string(),
        cpu_request: 1.0,
        cpu_limit: 2.0,
        cpu_usage: 0.5,
        memory_request: 1024.0,
        memory_limit: 2048.0,
        memory_usage: 700.0,
        node_name: Some("node-a".to_string()),
        creation_timestamp: Some("2024-05-01 10:00:00".to_string()),
        labels: json!({"spark-role": pod_type, "spark-app-selector": app}),
        annotations: json!({}),
        container_restarts: 0,
    }
}

/// Move every snapshot of `pod_name` back in time.
fn age_snapshots(handles: &StorageHandles, pod_name: &str, age: Duration) {
    let ts = (Utc::now() - age).timestamp_micros();
    let conn = handles.pool().acquire().expect("acquire");
    conn.execute(
        "UPDATE pod_history SET timestamp = ?1 WHERE pod_name = ?2",
        params![ts, pod_name],
    )
    .expect("age rows");
}

fn count_rows(handles: &StorageHandles) -> i64 {
    handles.admin.get_database_stats().total_records
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_ingestion_is_append_only() {
    let (_dir, handles) = open_store();
    let pod = PodDescriptor::new("spark-pi-driver", "Running");
    let spec = ResourceSpec {
        cpu_request: 1.0,
        cpu_limit: 1.0,
        memory_request: 512.0,
        memory_limit: 512.0,
    };

    let first = handles
        .writer
        .store_pod_data(
            "spark",
            &pod,
            PodType::Driver,
            "spark-pi",
            &spec,
            &ResourceUsage {
                cpu_usage: 0.1,
                memory_usage: 100.0,
            },
        )
        .unwrap();
    let second = handles
        .writer
        .store_pod_data(
            "spark",
            &pod,
            PodType::Driver,
            "spark-pi",
            &spec,
            &ResourceUsage {
                cpu_usage: 0.9,
                memory_usage: 400.0,
            },
        )
        .unwrap();
    assert!(second > first);

    let timeline = handles
        .reader
        .get_pod_timeline("spark", "spark-pi-driver")
        .unwrap();
    assert_eq!(timeline.snapshots.len(), 2);
    assert_eq!(timeline.snapshots[0].id, first);
    assert_eq!(timeline.snapshots[0].cpu_usage, 0.1);
    assert_eq!(timeline.snapshots[0].memory_usage, 100.0);
    assert_eq!(timeline.snapshots[1].cpu_usage, 0.9);
}

#[test]
fn test_lifecycle_deactivation() {
    let (_dir, handles) = open_store();
    handles
        .writer
        .store_pod_data_batch(&[
            row("ns", "a", "driver", "app"),
            row("ns", "b", "executor", "app"),
            row("ns", "c", "executor", "app"),
        ])
        .unwrap();

    let changed = handles
        .writer
        .mark_pods_inactive("ns", &["a".to_string(), "b".to_string()])
        .unwrap();
    assert_eq!(changed, 1);

    let rows = handles.reader.get_historical_data("ns", 1, None).unwrap();
    for record in rows {
        if record.pod_name == "c" {
            assert!(!record.is_active);
            assert!(record.deletion_timestamp.is_some());
        } else {
            assert!(record.is_active);
            assert!(record.deletion_timestamp.is_none());
        }
    }
}

#[test]
fn test_empty_active_set_deactivates_namespace() {
    let (_dir, handles) = open_store();
    handles
        .writer
        .store_pod_data_batch(&[
            row("ns", "a", "driver", "app"),
            row("ns", "b", "executor", "app"),
            row("keep", "z", "driver", "app"),
        ])
        .unwrap();

    assert_eq!(handles.writer.mark_pods_inactive("ns", &[]).unwrap(), 2);

    let stats = handles.admin.get_database_stats();
    assert_eq!(stats.active_records, 1);
    let ns_rows = handles.reader.get_historical_data("ns", 1, None).unwrap();
    assert!(ns_rows.iter().all(|r| !r.is_active));
}

#[test]
fn test_batch_atomicity_on_validation_failure() {
    let (_dir, handles) = open_store();
    let mut rows: Vec<_> = (0..10)
        .map(|i| row("ns", &format!("exec-{i}"), "executor", "app"))
        .collect();
    rows[7].cpu_usage = f64::INFINITY;

    let err = handles.writer.store_pod_data_batch(&rows).unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
    assert_eq!(count_rows(&handles), 0);
}

#[test]
fn test_batch_atomicity_on_storage_failure() {
    let (_dir, handles) = open_store();
    {
        let conn = handles.pool().acquire().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER fail_boom BEFORE INSERT ON pod_history
             WHEN NEW.pod_name = 'boom'
             BEGIN SELECT RAISE(ABORT, 'induced failure'); END;",
        )
        .unwrap();
    }

    let rows = vec![
        row("ns", "ok-1", "executor", "app"),
        row("ns", "ok-2", "executor", "app"),
        row("ns", "boom", "executor", "app"),
        row("ns", "ok-3", "executor", "app"),
    ];
    let err = handles.writer.store_pod_data_batch(&rows).unwrap_err();
    assert_eq!(err.operation(), Some("store_pod_data_batch"));
    assert_eq!(count_rows(&handles), 0);

    // The handle went back to the pool in a usable state
    let status = handles.pool().status();
    assert_eq!(status.in_use, 0);
    handles
        .writer
        .store_pod_data_batch(&rows[..2])
        .expect("store after rollback");
    assert_eq!(count_rows(&handles), 2);
}

#[test]
fn test_retention_clamp() {
    let (_dir, handles) = open_store();
    handles
        .writer
        .store_pod_data_batch(&[
            row("ns", "two-days", "executor", "app"),
            row("ns", "year-plus", "executor", "app"),
            row("ns", "fresh", "executor", "app"),
        ])
        .unwrap();
    age_snapshots(&handles, "two-days", Duration::days(2));
    age_snapshots(&handles, "year-plus", Duration::days(400));

    // Behaves as 365: only the 400-day-old row goes
    let report = handles.admin.cleanup_old_data(9999).unwrap();
    assert_eq!(report.retention_days, 365);
    assert_eq!(report.history_records_deleted, 1);

    // Behaves as 1: the 2-day-old row goes
    let report = handles.admin.cleanup_old_data(-5).unwrap();
    assert_eq!(report.retention_days, 1);
    assert_eq!(report.history_records_deleted, 1);

    assert_eq!(
        handles.reader.list_pod_names(Some("ns")).unwrap(),
        vec!["fresh".to_string()]
    );
}

#[test]
fn test_history_time_filter() {
    let (_dir, handles) = open_store();
    handles
        .writer
        .store_pod_data_batch(&[
            row("ns", "recent", "executor", "app"),
            row("ns", "stale", "executor", "app"),
        ])
        .unwrap();
    age_snapshots(&handles, "recent", Duration::hours(2));
    age_snapshots(&handles, "stale", Duration::hours(50));

    let rows = handles.reader.get_historical_data("ns", 24, None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pod_name, "recent");
}

#[test]
fn test_export_round_trip() {
    let (_dir, handles) = open_store();
    let names = ["drv", "exec-1", "exec-2"];
    let rows: Vec<_> = names
        .iter()
        .map(|n| row("ns", n, "executor", "app"))
        .collect();
    handles.writer.store_pod_data_batch(&rows).unwrap();

    // Bare dates: the end date covers its whole day
    let start = (Utc::now() - Duration::days(1)).format("%Y-%m-%d").to_string();
    let end = (Utc::now() + Duration::days(1)).format("%Y-%m-%d").to_string();
    let json = handles
        .reader
        .export_historical_data("ns", &start, &end, ExportFormat::Json)
        .unwrap();
    let parsed: Vec<Value> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.len(), names.len());

    let mut exported: Vec<&str> = parsed
        .iter()
        .map(|v| v["pod_name"].as_str().unwrap())
        .collect();
    exported.sort_unstable();
    assert_eq!(exported, names);

    let csv = handles
        .reader
        .export_historical_data("ns", &start, &end, ExportFormat::Csv)
        .unwrap();
    assert_eq!(csv.lines().count(), names.len() + 1);
}

#[test]
fn test_pool_bound_fails_fast() {
    let dir = TempDir::new().unwrap();
    let handles = StorageBuilder::new(dir.path().join("pool.db"))
        .max_connections(3)
        .build()
        .unwrap();

    let held: Vec<_> = (0..3).map(|_| handles.pool().acquire().unwrap()).collect();
    let err = handles.pool().acquire().unwrap_err();
    assert!(matches!(err, StorageError::PoolExhausted { max: 3 }));
    assert!(err.is_retryable());

    // Facade calls surface the same condition
    let err = handles
        .writer
        .store_pod_data_batch(&[row("ns", "p", "driver", "app")])
        .unwrap_err();
    assert!(matches!(err, StorageError::PoolExhausted { .. }));

    drop(held);
    assert!(handles.pool().acquire().is_ok());
}

// =============================================================================
// Scenario
// =============================================================================

#[test]
fn test_driver_and_executors_scenario() {
    let (_dir, handles) = open_store();

    handles
        .writer
        .store_pod_data_batch(&[
            row("ns1", "app-driver", "driver", "app"),
            row("ns1", "app-exec-1", "executor", "app"),
            row("ns1", "app-exec-2", "executor", "app"),
            row("ns1", "app-exec-3", "executor", "app"),
        ])
        .unwrap();

    let rows = handles.reader.get_historical_data("ns1", 1, None).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(
        rows.iter().filter(|r| r.pod_type == PodType::Driver).count(),
        1
    );

    // A later round only sees exec-2: it becomes the most recent name
    handles
        .writer
        .store_pod_data_batch(&[row("ns1", "app-exec-2", "executor", "app")])
        .unwrap();
    let names = handles.reader.list_pod_names(Some("ns1")).unwrap();
    assert_eq!(names.len(), 4);
    assert_eq!(names[0], "app-exec-2");

    // One extra row aged ten days is the only one cleanup removes
    handles
        .writer
        .store_pod_data_batch(&[row("ns1", "old-exec", "executor", "app")])
        .unwrap();
    age_snapshots(&handles, "old-exec", Duration::days(10));

    let report = handles.admin.cleanup_old_data(1).unwrap();
    assert_eq!(report.history_records_deleted, 1);
    assert_eq!(report.events_deleted, 0);

    let remaining = handles.reader.list_pod_names(Some("ns1")).unwrap();
    assert_eq!(remaining.len(), 4);
    assert!(!remaining.contains(&"old-exec".to_string()));
}

// =============================================================================
// Concurrency and lifecycle
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let (_dir, handles) = open_store();
    let writer = handles.writer.clone();
    let reader = handles.reader.clone();

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let writer = writer.clone();
            let reader = reader.clone();
            thread::spawn(move || {
                for round in 0..10 {
                    let rows: Vec<_> = (0..3)
                        .map(|i| row("ns", &format!("t{t}-r{round}-p{i}"), "executor", "app"))
                        .collect();
                    writer.store_pod_data_batch(&rows).unwrap();
                    reader.list_pod_names(Some("ns")).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(handles.admin.get_database_stats().total_records, 4 * 10 * 3);
    assert!(handles.ops_per_sec() > 0.0);
}

#[test]
fn test_events_in_timeline_and_stats() {
    let (_dir, handles) = open_store();
    handles
        .writer
        .store_pod_data_batch(&[row("ns", "drv", "driver", "app")])
        .unwrap();
    handles
        .writer
        .log_pod_event("ns", "drv", "created", "Scheduled", "assigned to node-a", "app")
        .unwrap();
    handles
        .writer
        .log_pod_event("ns", "drv", "deleted", "", "", "app")
        .unwrap();

    let timeline = handles.reader.get_pod_timeline("ns", "drv").unwrap();
    assert_eq!(timeline.snapshots.len(), 1);
    let kinds: Vec<_> = timeline.events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["created", "deleted"]);

    let stats = handles.admin.get_database_stats();
    assert_eq!(stats.total_events, 2);
    assert!(stats.healthy);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("persist.db");

    let handles = StorageBuilder::new(&path).build().unwrap();
    handles
        .writer
        .store_pod_data_batch(&[row("ns", "drv", "driver", "app")])
        .unwrap();
    handles.shutdown();

    let handles = StorageBuilder::new(&path).build().unwrap();
    let rows = handles.reader.get_historical_data("ns", 1, None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].labels.get("spark-role").map(String::as_str),
        Some("driver")
    );
    assert!(rows[0].creation_timestamp.is_some());
}

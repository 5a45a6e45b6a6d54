//! Core data types for the storage layer.
//!
//! Inputs handed over by the cluster poller:
//!
//! - [`PodDescriptor`], [`ResourceSpec`], [`ResourceUsage`]: one observed pod
//! - [`RawSnapshotRow`]: the loosely-typed tuple used for batch ingestion
//!
//! Outputs returned to UI and export callers:
//!
//! - [`SnapshotRecord`] / [`EventRecord`]: owned copies of stored rows
//! - [`PodTimeline`], [`CleanupReport`], [`DatabaseStats`]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;
use crate::storage::pool::PoolStatus;

/// Label and annotation maps. `BTreeMap` keeps keys sorted, which makes the
/// stored JSON encoding canonical.
pub type Labels = BTreeMap<String, String>;

/// Role of a pod inside a Spark application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PodType {
    /// The Spark driver pod.
    Driver,
    /// A Spark executor pod.
    Executor,
}

/// Pod metadata as observed by the poller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodDescriptor {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub node_name: Option<String>,
    /// Sum of restart counts over all containers.
    #[serde(default)]
    pub restart_count: u32,
    /// Pod phase (`Running`, `Pending`, `Succeeded`, ...).
    pub phase: String,
}

impl PodDescriptor {
    /// Create a descriptor with the given name and phase.
    pub fn new(name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            ..Default::default()
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the scheduling node.
    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    /// Set the creation time.
    pub fn with_creation_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(ts);
        self
    }

    /// Set the container restart count.
    pub fn with_restarts(mut self, restart_count: u32) -> Self {
        self.restart_count = restart_count;
        self
    }
}

/// Requested and limited resources (CPU in cores, memory in MiB).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu_request: f64,
    pub cpu_limit: f64,
    pub memory_request: f64,
    pub memory_limit: f64,
}

/// Observed usage (CPU in cores, memory in MiB).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// One row of a batch insert, in the loose shape the poller produces.
///
/// Every field is checked during normalization; a single structurally
/// invalid row rejects the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshotRow {
    pub namespace: String,
    pub pod_name: String,
    /// `driver` or `executor` (case-insensitive).
    pub pod_type: String,
    pub app_name: String,
    pub status: String,
    pub cpu_request: f64,
    pub cpu_limit: f64,
    pub cpu_usage: f64,
    pub memory_request: f64,
    pub memory_limit: f64,
    pub memory_usage: f64,
    pub node_name: Option<String>,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS`; naive values are UTC.
    pub creation_timestamp: Option<String>,
    /// JSON object, JSON string holding an object, or null.
    #[serde(default)]
    pub labels: serde_json::Value,
    #[serde(default)]
    pub annotations: serde_json::Value,
    pub container_restarts: i64,
}

/// A stored pod snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub pod_name: String,
    pub pod_type: PodType,
    pub app_name: String,
    pub status: String,
    pub cpu_request: f64,
    pub cpu_limit: f64,
    pub cpu_usage: f64,
    pub memory_request: f64,
    pub memory_limit: f64,
    pub memory_usage: f64,
    pub node_name: Option<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub labels: Labels,
    pub annotations: Labels,
    pub container_restarts: i64,
    pub is_active: bool,
}

/// A stored pod lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub pod_name: String,
    pub event_type: String,
    pub event_reason: Option<String>,
    pub event_message: Option<String>,
    pub app_name: Option<String>,
}

/// Snapshots and events of one pod, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PodTimeline {
    pub snapshots: Vec<SnapshotRecord>,
    pub events: Vec<EventRecord>,
}

/// Export serialization format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExportFormat {
    /// Flat JSON array, one object per row.
    #[default]
    Json,
    /// Header line plus comma-separated rows.
    Csv,
}

impl ExportFormat {
    /// Parse a caller-supplied format name.
    ///
    /// # Errors
    /// Returns [`StorageError::Validation`] for anything but `json` or `csv`.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        s.trim()
            .parse()
            .map_err(|_| StorageError::Validation(format!("unsupported export format: '{s}'")))
    }
}

/// Result of a retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub history_records_deleted: usize,
    pub events_deleted: usize,
    /// Retention actually applied, after clamping.
    pub retention_days: i64,
    /// Whether the post-delete `VACUUM` succeeded.
    pub compacted: bool,
}

/// Aggregate store statistics for monitoring surfaces.
///
/// Built best-effort: a failure leaves the counters at their defaults,
/// `healthy = false` and the cause in `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_records: i64,
    pub total_events: i64,
    pub active_records: i64,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub journal_mode: Option<String>,
    pub healthy: bool,
    pub error: Option<String>,
    pub db_operations_per_sec: f64,
    pub pool: Option<PoolStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_pod_type_from_str() {
        assert_eq!(PodType::from_str("driver").unwrap(), PodType::Driver);
        assert_eq!(PodType::from_str("EXECUTOR").unwrap(), PodType::Executor);
        assert!(PodType::from_str("sidecar").is_err());
    }

    #[test]
    fn test_pod_type_as_str() {
        assert_eq!(PodType::Driver.as_ref(), "driver");
        assert_eq!(PodType::Executor.to_string(), "executor");
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!(ExportFormat::parse("json").unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::parse(" CSV ").unwrap(), ExportFormat::Csv);

        let err = ExportFormat::parse("xml").unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn test_pod_descriptor_builder() {
        let pod = PodDescriptor::new("spark-pi-driver", "Running")
            .with_label("spark-role", "driver")
            .with_annotation("owner", "team-a")
            .with_node("node-1")
            .with_restarts(2);

        assert_eq!(pod.name, "spark-pi-driver");
        assert_eq!(pod.labels.get("spark-role").map(String::as_str), Some("driver"));
        assert_eq!(pod.annotations.len(), 1);
        assert_eq!(pod.node_name.as_deref(), Some("node-1"));
        assert_eq!(pod.restart_count, 2);
        assert!(pod.creation_timestamp.is_none());
    }

    #[test]
    fn test_labels_serialize_sorted() {
        let mut labels = Labels::new();
        labels.insert("zeta".to_string(), "1".to_string());
        labels.insert("alpha".to_string(), "2".to_string());
        assert_eq!(
            serde_json::to_string(&labels).unwrap(),
            r#"{"alpha":"2","zeta":"1"}"#
        );
    }
}

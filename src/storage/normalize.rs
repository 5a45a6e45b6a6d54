//! Input normalization for ingestion and query parameters.
//!
//! Everything here runs before a connection is acquired, so a rejected input
//! never touches storage.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::storage::StorageError;
use crate::storage::types::{
    Labels, PodDescriptor, PodType, RawSnapshotRow, ResourceSpec, ResourceUsage,
};

/// Maximum stored length of an event message, in characters.
pub const MAX_EVENT_MESSAGE_CHARS: usize = 1000;

/// Kubernetes object-name length limit.
const MAX_POD_NAME_LEN: usize = 253;

/// Kubernetes namespace length limit.
const MAX_NAMESPACE_LEN: usize = 63;

/// Retention bounds in days.
pub const MIN_RETENTION_DAYS: i64 = 1;
pub const MAX_RETENTION_DAYS: i64 = 365;

/// Sequences replaced by `_` in pod names.
const DANGEROUS_SEQUENCES: [&str; 8] = ["'", "\"", ";", "--", "/*", "*/", "xp_", "sp_"];

/// A snapshot ready to be written, minus its capture timestamp.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NormalizedSnapshot {
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
    /// UTC microseconds.
    pub creation_timestamp: Option<i64>,
    /// Canonical JSON.
    pub labels: String,
    /// Canonical JSON.
    pub annotations: String,
    pub container_restarts: i64,
}

/// Validate and canonicalize a Kubernetes namespace.
///
/// Trims and lowercases, then requires `[a-z0-9-]`, at most 63 characters and
/// no leading or trailing hyphen.
///
/// # Examples
///
/// ```
/// use sparkmon::storage::validate_namespace;
///
/// assert_eq!(validate_namespace(" Spark-Apps ").unwrap(), "spark-apps");
/// assert!(validate_namespace("-bad").is_err());
/// ```
pub fn validate_namespace(namespace: &str) -> Result<String, StorageError> {
    static NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex =
        NAMESPACE_REGEX.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("valid namespace regex"));

    let namespace = namespace.trim().to_lowercase();
    if namespace.is_empty() {
        return Err(StorageError::Validation(
            "namespace cannot be empty".to_string(),
        ));
    }
    if !regex.is_match(&namespace) {
        return Err(StorageError::Validation(format!(
            "namespace '{namespace}' must contain only lowercase letters, numbers, and hyphens"
        )));
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(StorageError::Validation(format!(
            "namespace must be {MAX_NAMESPACE_LEN} characters or less"
        )));
    }
    if namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(StorageError::Validation(format!(
            "namespace '{namespace}' cannot start or end with a hyphen"
        )));
    }
    Ok(namespace)
}

/// Sanitize a pod name for storage.
///
/// Quote, comment and statement-separator sequences are replaced by `_`.
/// Empty or over-long names are rejected.
pub fn sanitize_pod_name(pod_name: &str) -> Result<String, StorageError> {
    static POD_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex =
        POD_NAME_REGEX.get_or_init(|| Regex::new(r"^[a-z0-9.-]+$").expect("valid pod name regex"));

    if pod_name.trim().is_empty() {
        return Err(StorageError::Validation(
            "pod name cannot be empty".to_string(),
        ));
    }

    let mut sanitized = pod_name.to_string();
    for seq in DANGEROUS_SEQUENCES {
        if sanitized.contains(seq) {
            tracing::warn!(sequence = seq, pod_name, "Replaced suspicious sequence in pod name");
            sanitized = sanitized.replace(seq, "_");
        }
    }
    let sanitized = sanitized.trim().to_string();

    if sanitized.chars().count() > MAX_POD_NAME_LEN {
        return Err(StorageError::Validation(format!(
            "pod name must be {MAX_POD_NAME_LEN} characters or less"
        )));
    }
    if !regex.is_match(&sanitized.to_lowercase()) {
        tracing::warn!(pod_name = %sanitized, "Pod name contains non-standard characters");
    }
    Ok(sanitized)
}

/// Reject non-finite values and clamp negatives to zero.
pub fn coerce_resource(field: &str, value: f64) -> Result<f64, StorageError> {
    if !value.is_finite() {
        return Err(StorageError::Validation(format!(
            "{field} must be a finite number, got {value}"
        )));
    }
    Ok(value.max(0.0))
}

/// Clamp a retention period into `[1, 365]` days.
pub fn clamp_retention_days(days: i64) -> i64 {
    let clamped = days.clamp(MIN_RETENTION_DAYS, MAX_RETENTION_DAYS);
    if clamped != days {
        tracing::warn!(
            requested = days,
            applied = clamped,
            "Retention days out of range, clamped"
        );
    }
    clamped
}

/// Parse a timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`,
/// `YYYY-MM-DDTHH:MM:SS[.f]` or a bare `YYYY-MM-DD` (midnight).
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(naive) = parse_bare_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)) {
        return Ok(naive.and_utc());
    }
    Err(StorageError::Validation(format!(
        "unrecognized timestamp: '{s}'"
    )))
}

/// Parse the lower bound of an export range.
pub fn parse_range_start(s: &str) -> Result<DateTime<Utc>, StorageError> {
    parse_timestamp(s)
}

/// Parse the upper bound of an export range. A bare date covers the whole
/// day, through 23:59:59.999999.
pub fn parse_range_end(s: &str) -> Result<DateTime<Utc>, StorageError> {
    match parse_bare_date(s.trim()).and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999)) {
        Some(naive) => Ok(naive.and_utc()),
        None => parse_timestamp(s),
    }
}

fn parse_bare_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Encode labels as sorted-key JSON.
pub fn canonical_labels(labels: &Labels) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "{}".to_string())
}

/// Build a label map from a loosely-typed JSON value.
///
/// Accepts an object (non-string values keep their JSON text), a string that
/// holds a JSON object, an empty string, or null.
pub fn labels_from_value(field: &str, value: &Value) -> Result<Labels, StorageError> {
    match value {
        Value::Null => Ok(Labels::new()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()),
        Value::String(s) if s.trim().is_empty() => Ok(Labels::new()),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s).map_err(|e| {
                StorageError::Validation(format!("{field} is not valid JSON: {e}"))
            })?;
            match parsed {
                Value::Object(_) | Value::Null => labels_from_value(field, &parsed),
                _ => Err(StorageError::Validation(format!(
                    "{field} must be a JSON object"
                ))),
            }
        }
        _ => Err(StorageError::Validation(format!(
            "{field} must be a JSON object"
        ))),
    }
}

/// Truncate an event message to [`MAX_EVENT_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_EVENT_MESSAGE_CHARS).collect()
}

/// Normalize a typed single-pod observation.
pub(crate) fn normalize_snapshot(
    namespace: &str,
    pod: &PodDescriptor,
    pod_type: PodType,
    app_name: &str,
    resources: &ResourceSpec,
    usage: &ResourceUsage,
) -> Result<NormalizedSnapshot, StorageError> {
    Ok(NormalizedSnapshot {
        namespace: validate_namespace(namespace)?,
        pod_name: sanitize_pod_name(&pod.name)?,
        pod_type,
        app_name: app_name.trim().to_string(),
        status: pod.phase.trim().to_string(),
        cpu_request: coerce_resource("cpu_request", resources.cpu_request)?,
        cpu_limit: coerce_resource("cpu_limit", resources.cpu_limit)?,
        cpu_usage: coerce_resource("cpu_usage", usage.cpu_usage)?,
        memory_request: coerce_resource("memory_request", resources.memory_request)?,
        memory_limit: coerce_resource("memory_limit", resources.memory_limit)?,
        memory_usage: coerce_resource("memory_usage", usage.memory_usage)?,
        node_name: non_empty(pod.node_name.as_deref()),
        creation_timestamp: pod.creation_timestamp.map(|ts| ts.timestamp_micros()),
        labels: canonical_labels(&pod.labels),
        annotations: canonical_labels(&pod.annotations),
        container_restarts: i64::from(pod.restart_count),
    })
}

/// Normalize one raw batch row.
pub(crate) fn normalize_raw_row(row: &RawSnapshotRow) -> Result<NormalizedSnapshot, StorageError> {
    let pod_type = row.pod_type.trim().parse::<PodType>().map_err(|_| {
        StorageError::Validation(format!(
            "unsupported pod_type '{}' for pod '{}'",
            row.pod_type, row.pod_name
        ))
    })?;

    let creation_timestamp = match non_empty(row.creation_timestamp.as_deref()) {
        Some(ts) => Some(parse_timestamp(&ts)?.timestamp_micros()),
        None => None,
    };

    Ok(NormalizedSnapshot {
        namespace: validate_namespace(&row.namespace)?,
        pod_name: sanitize_pod_name(&row.pod_name)?,
        pod_type,
        app_name: row.app_name.trim().to_string(),
        status: row.status.trim().to_string(),
        cpu_request: coerce_resource("cpu_request", row.cpu_request)?,
        cpu_limit: coerce_resource("cpu_limit", row.cpu_limit)?,
        cpu_usage: coerce_resource("cpu_usage", row.cpu_usage)?,
        memory_request: coerce_resource("memory_request", row.memory_request)?,
        memory_limit: coerce_resource("memory_limit", row.memory_limit)?,
        memory_usage: coerce_resource("memory_usage", row.memory_usage)?,
        node_name: non_empty(row.node_name.as_deref()),
        creation_timestamp,
        labels: canonical_labels(&labels_from_value("labels", &row.labels)?),
        annotations: canonical_labels(&labels_from_value("annotations", &row.annotations)?),
        container_restarts: row.container_restarts.max(0),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

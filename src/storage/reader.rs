//! Query and export facade.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, ToSql, params};
use serde::Serialize;

use crate::storage::StorageError;
use crate::storage::normalize::{
    parse_range_end, parse_range_start, sanitize_pod_name, validate_namespace,
};
use crate::storage::pool::ConnectionPool;
use crate::storage::types::{
    EventRecord, ExportFormat, Labels, PodTimeline, PodType, SnapshotRecord,
};
use crate::telemetry::{OpRateTracker, observe};

/// Row cap for recent-history queries.
pub const MAX_HISTORY_ROWS: i64 = 10_000;

/// Row cap for each half of a pod timeline.
pub const MAX_TIMELINE_ROWS: i64 = 5_000;

/// Row cap for exports.
pub const MAX_EXPORT_ROWS: i64 = 50_000;

const SNAPSHOT_COLUMNS: &str = "id, timestamp, namespace, pod_name, pod_type, app_name, status, \
     cpu_request, cpu_limit, cpu_usage, memory_request, memory_limit, memory_usage, \
     node_name, creation_timestamp, deletion_timestamp, labels, annotations, \
     container_restarts, is_active";

/// Column order of CSV exports.
const EXPORT_HEADER: [&str; 20] = [
    "id",
    "timestamp",
    "namespace",
    "pod_name",
    "pod_type",
    "app_name",
    "status",
    "cpu_request",
    "cpu_limit",
    "cpu_usage",
    "memory_request",
    "memory_limit",
    "memory_usage",
    "node_name",
    "creation_timestamp",
    "deletion_timestamp",
    "labels",
    "annotations",
    "container_restarts",
    "is_active",
];

/// Snapshot and event reader.
#[derive(Clone)]
pub struct HistoryReader {
    pool: Arc<ConnectionPool>,
    rate: Arc<OpRateTracker>,
}

impl fmt::Debug for HistoryReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryReader").finish_non_exhaustive()
    }
}

impl HistoryReader {
    pub(crate) fn new(pool: Arc<ConnectionPool>, rate: Arc<OpRateTracker>) -> Self {
        Self { pool, rate }
    }

    /// Snapshots captured in the last `hours_back` hours, newest first,
    /// optionally restricted to one application. At most 10,000 rows.
    pub fn get_historical_data(
        &self,
        namespace: &str,
        hours_back: u32,
        app_name: Option<&str>,
    ) -> Result<Vec<SnapshotRecord>, StorageError> {
        const OP: &str = "get_historical_data";
        observe(&self.rate, OP, || {
            let namespace = validate_namespace(namespace)?;
            // A window reaching past the calendar range covers all history
            let cutoff = Utc::now()
                .checked_sub_signed(Duration::hours(i64::from(hours_back)))
                .map_or(i64::MIN, |ts| ts.timestamp_micros());

            let mut sql = format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM pod_history WHERE namespace = ? AND timestamp >= ?"
            );
            let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(namespace), Box::new(cutoff)];

            if let Some(app) = app_name.map(str::trim).filter(|a| !a.is_empty()) {
                sql.push_str(" AND app_name = ?");
                params.push(Box::new(app.to_string()));
            }
            sql.push_str(&format!(
                " ORDER BY timestamp DESC, id DESC LIMIT {MAX_HISTORY_ROWS}"
            ));

            let conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            query_snapshots(&conn, &sql, param_refs.as_slice())
                .map_err(|source| StorageError::Operation { operation: OP, source })
        })
    }

    /// Every snapshot and event of one pod, oldest first. Both lists are read
    /// inside one transaction and capped at 5,000 rows each.
    pub fn get_pod_timeline(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<PodTimeline, StorageError> {
        const OP: &str = "get_pod_timeline";
        observe(&self.rate, OP, || {
            let namespace = validate_namespace(namespace)?;
            let pod_name = sanitize_pod_name(pod_name)?;

            let mut conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            read_timeline(&mut conn, &namespace, &pod_name)
                .map_err(|source| StorageError::Operation { operation: OP, source })
        })
    }

    /// Distinct pod names, most recently seen first.
    pub fn list_pod_names(&self, namespace: Option<&str>) -> Result<Vec<String>, StorageError> {
        const OP: &str = "list_pod_names";
        observe(&self.rate, OP, || {
            let namespace = namespace.map(validate_namespace).transpose()?;

            let mut sql = String::from("SELECT pod_name FROM pod_history");
            let mut params: Vec<Box<dyn ToSql>> = Vec::new();
            if let Some(ns) = namespace {
                sql.push_str(" WHERE namespace = ?");
                params.push(Box::new(ns));
            }
            sql.push_str(" GROUP BY pod_name ORDER BY MAX(timestamp) DESC, MAX(id) DESC");

            let conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let list = || -> rusqlite::Result<Vec<String>> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(param_refs.as_slice(), |row| row.get(0))?;
                rows.collect()
            };
            list().map_err(|source| StorageError::Operation { operation: OP, source })
        })
    }

    /// Render every snapshot in `[start, end]` as JSON or CSV, newest first.
    ///
    /// A bare `YYYY-MM-DD` end date covers that whole day. At most 50,000
    /// rows are exported.
    pub fn export_historical_data(
        &self,
        namespace: &str,
        start: &str,
        end: &str,
        format: ExportFormat,
    ) -> Result<String, StorageError> {
        const OP: &str = "export_historical_data";
        observe(&self.rate, OP, || {
            let namespace = validate_namespace(namespace)?;
            let start = parse_range_start(start)?;
            let end = parse_range_end(end)?;
            if start > end {
                return Err(StorageError::Validation(format!(
                    "export range start {start} is after end {end}"
                )));
            }

            let records = {
                let conn = self.pool.acquire().map_err(|e| e.in_operation(OP))?;
                query_snapshots(
                    &conn,
                    &format!(
                        "SELECT {SNAPSHOT_COLUMNS} FROM pod_history
                         WHERE namespace = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                         ORDER BY timestamp DESC, id DESC LIMIT {MAX_EXPORT_ROWS}"
                    ),
                    params![namespace, start.timestamp_micros(), end.timestamp_micros()],
                )
                .map_err(|source| StorageError::Operation { operation: OP, source })?
            };

            tracing::info!(namespace = %namespace, rows = records.len(), format = %format, "Exporting history");
            let rows: Vec<ExportRow<'_>> = records.iter().map(ExportRow::from).collect();
            match format {
                ExportFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
                ExportFormat::Csv => Ok(render_csv(&rows)),
            }
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn query_snapshots(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<SnapshotRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, snapshot_from_row)?;
    rows.collect()
}

fn read_timeline(
    conn: &mut Connection,
    namespace: &str,
    pod_name: &str,
) -> rusqlite::Result<PodTimeline> {
    let tx = conn.transaction()?;
    let snapshots = query_snapshots(
        &tx,
        &format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM pod_history
             WHERE namespace = ?1 AND pod_name = ?2
             ORDER BY timestamp ASC, id ASC LIMIT {MAX_TIMELINE_ROWS}"
        ),
        params![namespace, pod_name],
    )?;
    let events = query_events(&tx, namespace, pod_name)?;
    tx.commit()?;
    Ok(PodTimeline { snapshots, events })
}

fn query_events(
    conn: &Connection,
    namespace: &str,
    pod_name: &str,
) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, timestamp, namespace, pod_name, event_type, event_reason, event_message, app_name
         FROM pod_events
         WHERE namespace = ?1 AND pod_name = ?2
         ORDER BY timestamp ASC, id ASC LIMIT {MAX_TIMELINE_ROWS}"
    ))?;
    let rows = stmt.query_map(params![namespace, pod_name], |row| {
        Ok(EventRecord {
            id: row.get(0)?,
            timestamp: from_micros(row.get(1)?),
            namespace: row.get(2)?,
            pod_name: row.get(3)?,
            event_type: row.get(4)?,
            event_reason: row.get(5)?,
            event_message: row.get(6)?,
            app_name: row.get(7)?,
        })
    })?;
    rows.collect()
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    let pod_type = PodType::from_str(&row.get::<_, String>(4)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(SnapshotRecord {
        id: row.get(0)?,
        timestamp: from_micros(row.get(1)?),
        namespace: row.get(2)?,
        pod_name: row.get(3)?,
        pod_type,
        app_name: row.get(5)?,
        status: row.get(6)?,
        cpu_request: row.get(7)?,
        cpu_limit: row.get(8)?,
        cpu_usage: row.get(9)?,
        memory_request: row.get(10)?,
        memory_limit: row.get(11)?,
        memory_usage: row.get(12)?,
        node_name: row.get(13)?,
        creation_timestamp: row.get::<_, Option<i64>>(14)?.map(from_micros),
        deletion_timestamp: row.get::<_, Option<i64>>(15)?.map(from_micros),
        labels: parse_map(&row.get::<_, Option<String>>(16)?.unwrap_or_default()),
        annotations: parse_map(&row.get::<_, Option<String>>(17)?.unwrap_or_default()),
        container_restarts: row.get(18)?,
        is_active: row.get(19)?,
    })
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse JSON string to a label map.
fn parse_map(s: &str) -> Labels {
    if s.is_empty() || s == "{}" {
        return Labels::new();
    }
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::debug!(error = %e, raw = s, "Failed to parse JSON map, returning empty");
        Labels::new()
    })
}

// =============================================================================
// Export rendering
// =============================================================================

/// Flat export shape: timestamps as RFC 3339 strings, label maps as their
/// JSON text.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: i64,
    timestamp: String,
    namespace: &'a str,
    pod_name: &'a str,
    pod_type: &'a str,
    app_name: &'a str,
    status: &'a str,
    cpu_request: f64,
    cpu_limit: f64,
    cpu_usage: f64,
    memory_request: f64,
    memory_limit: f64,
    memory_usage: f64,
    node_name: Option<&'a str>,
    creation_timestamp: Option<String>,
    deletion_timestamp: Option<String>,
    labels: String,
    annotations: String,
    container_restarts: i64,
    is_active: bool,
}

impl<'a> From<&'a SnapshotRecord> for ExportRow<'a> {
    fn from(r: &'a SnapshotRecord) -> Self {
        Self {
            id: r.id,
            timestamp: rfc3339(r.timestamp),
            namespace: &r.namespace,
            pod_name: &r.pod_name,
            pod_type: r.pod_type.as_ref(),
            app_name: &r.app_name,
            status: &r.status,
            cpu_request: r.cpu_request,
            cpu_limit: r.cpu_limit,
            cpu_usage: r.cpu_usage,
            memory_request: r.memory_request,
            memory_limit: r.memory_limit,
            memory_usage: r.memory_usage,
            node_name: r.node_name.as_deref(),
            creation_timestamp: r.creation_timestamp.map(rfc3339),
            deletion_timestamp: r.deletion_timestamp.map(rfc3339),
            labels: serde_json::to_string(&r.labels).unwrap_or_else(|_| "{}".to_string()),
            annotations: serde_json::to_string(&r.annotations)
                .unwrap_or_else(|_| "{}".to_string()),
            container_restarts: r.container_restarts,
            is_active: r.is_active,
        }
    }
}

impl ExportRow<'_> {
    fn csv_fields(&self) -> [String; 20] {
        [
            self.id.to_string(),
            self.timestamp.clone(),
            self.namespace.to_string(),
            self.pod_name.to_string(),
            self.pod_type.to_string(),
            self.app_name.to_string(),
            self.status.to_string(),
            self.cpu_request.to_string(),
            self.cpu_limit.to_string(),
            self.cpu_usage.to_string(),
            self.memory_request.to_string(),
            self.memory_limit.to_string(),
            self.memory_usage.to_string(),
            self.node_name.unwrap_or_default().to_string(),
            self.creation_timestamp.clone().unwrap_or_default(),
            self.deletion_timestamp.clone().unwrap_or_default(),
            self.labels.clone(),
            self.annotations.clone(),
            self.container_restarts.to_string(),
            u8::from(self.is_active).to_string(),
        ]
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn render_csv(rows: &[ExportRow<'_>]) -> String {
    let mut out = EXPORT_HEADER.join(",");
    out.push_str("\r\n");
    for row in rows {
        let fields = row.csv_fields();
        let line: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Quote a field when it holds a delimiter, quote or line break.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

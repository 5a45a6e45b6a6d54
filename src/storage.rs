//! Storage Layer
//!
//! SQLite persistence for Spark pod history. All access goes through a small
//! bounded [`ConnectionPool`] of WAL-mode connections; every public call
//! validates its input first, then borrows a connection for the duration of
//! one operation.
//!
//! # Components
//!
//! - [`SnapshotWriter`]: snapshot ingestion, deactivation and event logging
//! - [`HistoryReader`]: recent history, pod timelines, pod lists and export
//! - [`StorageAdmin`]: retention cleanup, statistics and checkpoints
//! - [`StorageBuilder`] / [`StorageHandles`]: initialization and lifecycle management

mod admin;
mod builder;
mod error;
mod normalize;
pub mod pool;
mod reader;
mod schema;
mod types;
mod writer;

pub use admin::StorageAdmin;
pub use builder::{StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use normalize::{
    MAX_EVENT_MESSAGE_CHARS, MAX_RETENTION_DAYS, MIN_RETENTION_DAYS, canonical_labels,
    clamp_retention_days, coerce_resource, labels_from_value, parse_range_end, parse_range_start,
    parse_timestamp, sanitize_pod_name, truncate_message, validate_namespace,
};
pub use pool::{ConnectionPool, PoolOptions, PoolStatus, PooledConnection};
pub use reader::{HistoryReader, MAX_EXPORT_ROWS, MAX_HISTORY_ROWS, MAX_TIMELINE_ROWS};
pub use schema::init_schema;
pub use types::{
    CleanupReport, DatabaseStats, EventRecord, ExportFormat, Labels, PodDescriptor, PodTimeline,
    PodType, RawSnapshotRow, ResourceSpec, ResourceUsage, SnapshotRecord,
};
pub use writer::SnapshotWriter;

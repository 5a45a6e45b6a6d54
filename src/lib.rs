//! sparkmon - Spark pod history store
//!
//! Durable history for a Spark-on-Kubernetes monitor. A poller hands over
//! one resource snapshot per observed driver or executor pod; this crate
//! stores them in a single SQLite file so current status, historical trends
//! and pod lifecycle timelines survive restarts.
//!
//! # Architecture
//!
//! - **Storage**: pooled WAL-mode SQLite with writer, reader and admin facades
//! - **Telemetry**: operation-rate tracking and slow-call logging
//! - **Config**: YAML configuration with environment expansion
//!
//! # Example
//!
//! ```rust,no_run
//! use sparkmon::storage::{RawSnapshotRow, StorageBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handles = StorageBuilder::new("spark_pods_history.db").build()?;
//!
//!     let row = RawSnapshotRow {
//!         namespace: "spark-apps".to_string(),
//!         pod_name: "spark-pi-driver".to_string(),
//!         pod_type: "driver".to_string(),
//!         app_name: "spark-pi".to_string(),
//!         status: "Running".to_string(),
//!         ..Default::default()
//!     };
//!     handles.writer.store_pod_data_batch(&[row])?;
//!     handles
//!         .writer
//!         .mark_pods_inactive("spark-apps", &["spark-pi-driver".to_string()])?;
//!
//!     let stats = handles.admin.get_database_stats();
//!     println!("{} snapshots", stats.total_records);
//!
//!     handles.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod storage;
pub mod telemetry;

pub use config::AppConfig;
pub use storage::{
    HistoryReader, SnapshotWriter, StorageAdmin, StorageBuilder, StorageError, StorageHandles,
};
pub use telemetry::OpRateTracker;

//! sparkmon Binary Entry Point
//!
//! Operator CLI over the pod history store: statistics, retention cleanup,
//! export and ad-hoc queries. Core functionality is provided by the
//! `sparkmon` library crate.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sparkmon::{
    config::AppConfig,
    storage::{ExportFormat, StorageHandles},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sparkmon - Spark pod history store
#[derive(Parser, Debug)]
#[command(name = "sparkmon", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/sparkmon.yaml",
        env = "SPARKMON_CONFIG"
    )]
    config: PathBuf,

    /// Database file (overrides config file)
    #[arg(long, env = "SPARKMON_DB_PATH")]
    db_path: Option<String>,

    /// Busy timeout such as `5s` or `750ms` (overrides config file)
    #[arg(long, value_parser = humantime::parse_duration)]
    busy_timeout: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print database statistics as JSON
    Stats,

    /// Delete history older than the retention period and compact the file
    Cleanup {
        /// Retention in days (defaults to the configured value; clamped to 1-365)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Export snapshots in a time range
    Export {
        #[arg(long)]
        namespace: String,
        /// Range start (RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`)
        #[arg(long)]
        start: String,
        /// Range end; a bare date covers the whole day
        #[arg(long)]
        end: String,
        /// `json` or `csv`
        #[arg(long, default_value = "json")]
        format: String,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List pod names, most recently seen first
    Pods {
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Print recent snapshots as JSON
    History {
        #[arg(long)]
        namespace: String,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long)]
        app: Option<String>,
    },

    /// Print every snapshot and event of one pod
    Timeline {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        pod: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sparkmon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = AppConfig::load_or_default(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(timeout) = cli.busy_timeout {
        config.database.busy_timeout = timeout;
    }
    config.validate()?;

    tracing::info!(
        "Database: {} (max_connections={}, busy_timeout={})",
        config.database.path,
        config.database.max_connections,
        humantime::format_duration(config.database.busy_timeout),
    );

    // Build storage layer
    let handles = config.database.to_builder().build()?;

    let result = run(&handles, &config, cli.command);

    tracing::info!("Shutting down storage...");
    handles.shutdown();
    result
}

fn run(
    handles: &StorageHandles,
    config: &AppConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Stats => {
            let stats = handles.admin.get_database_stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.retention.history_days);
            let report = handles.admin.cleanup_old_data(days)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Export {
            namespace,
            start,
            end,
            format,
            output,
        } => {
            let format = ExportFormat::parse(&format)?;
            let data = handles
                .reader
                .export_historical_data(&namespace, &start, &end, format)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, data)?;
                    tracing::info!("Export written to: {}", path.display());
                }
                None => println!("{data}"),
            }
        }
        Command::Pods { namespace } => {
            for name in handles.reader.list_pod_names(namespace.as_deref())? {
                println!("{name}");
            }
        }
        Command::History {
            namespace,
            hours,
            app,
        } => {
            let rows = handles
                .reader
                .get_historical_data(&namespace, hours, app.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Timeline { namespace, pod } => {
            let timeline = handles.reader.get_pod_timeline(&namespace, &pod)?;
            println!("{}", serde_json::to_string_pretty(&timeline)?);
        }
    }
    Ok(())
}

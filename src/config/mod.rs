//! Configuration module for sparkmon.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (path, pool size, busy timeout, page cache)
//! - Retention settings (history days)

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, RetentionConfig};
pub use validation::{ConfigError, expand_env_vars};

// Re-export constants
pub use app::{DEFAULT_DB_PATH, DEFAULT_HISTORY_DAYS};

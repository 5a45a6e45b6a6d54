//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::StorageBuilder;
use crate::storage::pool::{DEFAULT_BUSY_TIMEOUT, DEFAULT_CACHE_SIZE, DEFAULT_MAX_CONNECTIONS};

use super::validation::{
    ConfigError, expand_env_vars, require_non_empty, require_non_zero, require_positive,
};

// =============================================================================
// Constants
// =============================================================================

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "spark_pods_history.db";

/// Default history retention in days.
pub const DEFAULT_HISTORY_DAYS: i64 = 7;

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

fn default_cache_size() -> i64 {
    DEFAULT_CACHE_SIZE
}

fn default_history_days() -> i64 {
    DEFAULT_HISTORY_DAYS
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (default: "spark_pods_history.db").
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Maximum open connections (default: 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Wait on a locked database before failing (default: "5s").
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Page cache size per connection (default: 10000).
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl DatabaseConfig {
    /// A [`StorageBuilder`] carrying these settings.
    pub fn to_builder(&self) -> StorageBuilder {
        StorageBuilder::new(&self.path)
            .max_connections(self.max_connections)
            .busy_timeout(self.busy_timeout)
            .cache_size(self.cache_size)
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

/// Retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days of history kept by cleanup (default: 7). Clamped into
    /// `[1, 365]` when applied.
    #[serde(default = "default_history_days")]
    pub history_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_days: DEFAULT_HISTORY_DAYS,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retention configuration.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file, expanding `${VAR}` references
    /// first.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Retention is not range-checked here; cleanup clamps it.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("database.path", &self.database.path)?;
        require_positive("database.max_connections", self.database.max_connections)?;
        require_non_zero("database.busy_timeout", self.database.busy_timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.path, "spark_pods_history.db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_size, 10_000);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
database:
  path: /data/pods.db
  max_connections: 8
  busy_timeout: 2s 500ms
  cache_size: 4000
retention:
  history_days: 30
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.database.path, "/data/pods.db");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.database.busy_timeout, Duration::from_millis(2500));
        assert_eq!(config.database.cache_size, 4000);
        assert_eq!(config.retention.history_days, 30);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = AppConfig::from_yaml("retention:\n  history_days: 3\n").unwrap();
        assert_eq!(config.database, DatabaseConfig::default());
        assert_eq!(config.retention.history_days, 3);
    }

    #[test]
    fn test_out_of_range_retention_is_accepted() {
        let config = AppConfig::from_yaml("retention:\n  history_days: 1000\n").unwrap();
        assert_eq!(config.retention.history_days, 1000);
    }

    #[test]
    fn test_config_validation_invalid() {
        let yaml = "database:\n  max_connections: 0\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_connections"));

        let yaml = "database:\n  path: \"\"\n";
        assert!(AppConfig::from_yaml(yaml).is_err());

        let yaml = "database:\n  busy_timeout: 0s\n";
        assert!(AppConfig::from_yaml(yaml).is_err());

        let yaml = "database:\n  busy_timeout: soon\n";
        assert!(matches!(
            AppConfig::from_yaml(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_expansion_in_yaml() {
        let yaml = "database:\n  path: ${NONEXISTENT_SPARKMON_DB_12345:-/tmp/expanded.db}\n";
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.database.path, "/tmp/expanded.db");
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert_eq!(AppConfig::load_or_default(&missing).unwrap(), AppConfig::default());

        let present = dir.path().join("config.yaml");
        std::fs::write(&present, "database:\n  path: other.db\n").unwrap();
        let config = AppConfig::load_or_default(&present).unwrap();
        assert_eq!(config.database.path, "other.db");
    }

    #[test]
    fn test_to_builder_opens_storage() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("cfg.db").to_string_lossy().into_owned(),
            max_connections: 2,
            ..Default::default()
        };

        let handles = config.to_builder().build().unwrap();
        assert_eq!(handles.pool().status().max_connections, 2);
        handles.shutdown();
    }
}

//! Configuration management for relfga.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use relfga_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::queries::PageSizeLimits;
use crate::types::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Environment variable prefix: `RELFGA_PAGINATION__MAX_PAGE_SIZE` -> `pagination.max_page_size`.
const ENV_PREFIX: &str = "RELFGA";

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Page size settings for list-style queries
    #[serde(default)]
    pub pagination: PaginationSettings,

    /// Changelog read settings
    #[serde(default)]
    pub changelog: ChangelogSettings,

    /// Continuation token codec settings
    #[serde(default)]
    pub continuation_token: ContinuationTokenSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory", "postgres" or "mysql"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "postgres" or "mysql")
    pub database_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Query timeout in seconds (Postgres only)
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    30
}

impl StorageSettings {
    /// Connection settings for the Postgres backend.
    #[cfg(feature = "postgres")]
    pub fn postgres_config(&self) -> relfga_storage::PostgresConfig {
        relfga_storage::PostgresConfig {
            database_url: self.database_url.clone().unwrap_or_default(),
            max_connections: self.pool_size,
            connect_timeout_secs: self.connection_timeout_secs,
            query_timeout_secs: self.query_timeout_secs,
            ..Default::default()
        }
    }

    /// Connection settings for the MySQL backend.
    #[cfg(feature = "mysql")]
    pub fn mysql_config(&self) -> relfga_storage::MySQLConfig {
        relfga_storage::MySQLConfig {
            database_url: self.database_url.clone().unwrap_or_default(),
            max_connections: self.pool_size,
            connect_timeout_secs: self.connection_timeout_secs,
            ..Default::default()
        }
    }
}

/// Page size settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PaginationSettings {
    /// Page size used when a request leaves it unset
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Largest page size a request may ask for
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> u32 {
    MAX_PAGE_SIZE
}

impl PaginationSettings {
    pub fn limits(&self) -> PageSizeLimits {
        PageSizeLimits {
            default: self.default_page_size,
            max: self.max_page_size,
        }
    }
}

/// Changelog read settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// changelog:
///   horizon_offset_ms: 60000
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ChangelogSettings {
    /// Changes younger than this are not returned by ReadChanges.
    ///
    /// Environment variable: `RELFGA_CHANGELOG__HORIZON_OFFSET_MS`
    #[serde(default)]
    pub horizon_offset_ms: u64,
}

impl ChangelogSettings {
    pub fn horizon_offset(&self) -> Duration {
        Duration::from_millis(self.horizon_offset_ms)
    }
}

/// Continuation token codec settings.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct ContinuationTokenSettings {
    /// Encoder: "noop", "base64" or "hmac"
    #[serde(default = "default_token_encoder")]
    pub encoder: String,

    /// HMAC signing key (required if encoder is "hmac")
    pub key: Option<String>,
}

impl Default for ContinuationTokenSettings {
    fn default() -> Self {
        Self {
            encoder: default_token_encoder(),
            key: None,
        }
    }
}

// Custom Debug implementation to keep the signing key out of logs
impl std::fmt::Debug for ContinuationTokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationTokenSettings")
            .field("encoder", &self.encoder)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_token_encoder() -> String {
    "base64".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `RELFGA_` and use `__` as separator.
    /// For example:
    /// - `RELFGA_CHANGELOG__HORIZON_OFFSET_MS=1000` overrides `changelog.horizon_offset_ms`
    /// - `RELFGA_STORAGE__DATABASE_URL=...` overrides `storage.database_url`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        // Check if file exists
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(env_source())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let invalid = |message: String| Err(ConfigLoadError::Invalid { message });

        // Validate storage backend
        let valid_backends = ["memory", "postgres", "mysql"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return invalid(format!(
                "storage.backend must be one of: {:?}, got: {}",
                valid_backends, self.storage.backend
            ));
        }

        // Database backends require non-empty database_url
        if self.storage.backend != "memory"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return invalid(format!(
                "storage.database_url is required when backend is '{}'",
                self.storage.backend
            ));
        }

        let pagination = &self.pagination;
        if pagination.max_page_size == 0 {
            return invalid("pagination.max_page_size must be greater than 0".to_string());
        }
        if pagination.default_page_size == 0
            || pagination.default_page_size > pagination.max_page_size
        {
            return invalid(format!(
                "pagination.default_page_size must be between 1 and {}, got: {}",
                pagination.max_page_size, pagination.default_page_size
            ));
        }

        let valid_encoders = ["noop", "base64", "hmac"];
        let token = &self.continuation_token;
        if !valid_encoders.contains(&token.encoder.as_str()) {
            return invalid(format!(
                "continuation_token.encoder must be one of: {:?}, got: {}",
                valid_encoders, token.encoder
            ));
        }
        if token.encoder == "hmac" && token.key.as_deref().map_or(true, str::is_empty) {
            return invalid(
                "continuation_token.key is required when encoder is 'hmac'".to_string(),
            );
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            ));
        }

        Ok(())
    }
}

/// `RELFGA_` prefixed variables, `__` separating nested keys.
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
storage:
  backend: memory
  pool_size: 20

pagination:
  default_page_size: 25
  max_page_size: 200

changelog:
  horizon_offset_ms: 60000

continuation_token:
  encoder: hmac
  key: "s3cret"

logging:
  level: debug
  json: true
"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();

        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.pool_size, 20);
        assert_eq!(config.pagination.limits().default, 25);
        assert_eq!(config.pagination.limits().max, 200);
        assert_eq!(
            config.changelog.horizon_offset(),
            Duration::from_secs(60)
        );
        assert_eq!(config.continuation_token.encoder, "hmac");
        assert_eq!(config.continuation_token.key.as_deref(), Some("s3cret"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
changelog:
  horizon_offset_ms: 1000
"#
        )
        .unwrap();

        std::env::set_var("RELFGA_CHANGELOG__HORIZON_OFFSET_MS", "5000");
        std::env::set_var("RELFGA_LOGGING__LEVEL", "warn");

        let config = ServerConfig::load(file.path());

        std::env::remove_var("RELFGA_CHANGELOG__HORIZON_OFFSET_MS");
        std::env::remove_var("RELFGA_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.changelog.horizon_offset_ms, 5000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_config_validation_catches_errors() {
        let cases: [(fn(&mut ServerConfig), &str); 10] = [
            (|c: &mut ServerConfig| c.storage.backend = "rocksdb".to_string(), "storage.backend"),
            (|c: &mut ServerConfig| c.storage.backend = "postgres".to_string(), "database_url"),
            (
                |c: &mut ServerConfig| {
                    c.storage.backend = "mysql".to_string();
                    c.storage.database_url = Some("   ".to_string());
                },
                "database_url",
            ),
            (|c: &mut ServerConfig| c.pagination.default_page_size = 0, "default_page_size"),
            (
                |c: &mut ServerConfig| {
                    c.pagination.default_page_size = 80;
                    c.pagination.max_page_size = 40;
                },
                "default_page_size",
            ),
            (|c: &mut ServerConfig| c.pagination.max_page_size = 0, "max_page_size"),
            (|c: &mut ServerConfig| c.continuation_token.encoder = "rot13".to_string(), "encoder"),
            (|c: &mut ServerConfig| c.continuation_token.encoder = "hmac".to_string(), "key"),
            (
                |c: &mut ServerConfig| {
                    c.continuation_token.encoder = "hmac".to_string();
                    c.continuation_token.key = Some(String::new());
                },
                "key",
            ),
            (|c: &mut ServerConfig| c.logging.level = "loud".to_string(), "logging.level"),
        ];

        for (mutate, needle) in cases {
            let mut config = ServerConfig::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected {needle:?} in {err}"
            );
        }
    }

    #[test]
    fn test_sql_backend_with_url_is_valid() {
        let mut config = ServerConfig::default();
        config.storage.backend = "postgres".to_string();
        config.storage.database_url = Some("postgres://localhost/relfga".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_returns_clear_error() {
        let result = ServerConfig::load("/nonexistent/path/config.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.pagination.default_page_size, 50);
        assert_eq!(config.pagination.max_page_size, 100);
        assert_eq!(config.changelog.horizon_offset(), Duration::ZERO);
        assert_eq!(config.continuation_token.encoder, "base64");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("RELFGA_PAGINATION__MAX_PAGE_SIZE", "500");

        let config = ServerConfig::from_env();

        std::env::remove_var("RELFGA_PAGINATION__MAX_PAGE_SIZE");

        let config = config.unwrap();
        assert_eq!(config.pagination.max_page_size, 500);
        assert_eq!(config.pagination.default_page_size, 50);
    }

    #[test]
    fn test_token_key_is_redacted_in_debug() {
        let settings = ContinuationTokenSettings {
            encoder: "hmac".to_string(),
            key: Some("hunter2".to_string()),
        };
        let debug = format!("{settings:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}

//! Application configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::{DEFAULT_CHANNEL_CAPACITY, IN_MEMORY_PATH};

use super::validation::{
    ConfigError, check_log_filter, expand_env_vars, parse_interval, require_non_blank,
    require_positive,
};

// =============================================================================
// Constants
// =============================================================================

/// Tracing filter used when neither the CLI, `RUST_LOG` nor the file sets one.
pub const DEFAULT_LOG_FILTER: &str = "info,eventviewer=debug";

/// Default database file.
const DEFAULT_DB_PATH: &str = "eventviewer.db";

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_checkpoint_interval() -> String {
    "5s".to_string()
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path, `${VAR}` expanded. `:memory:` keeps everything in RAM.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// MPSC channel capacity for write operations (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Checkpoint interval (default: "5s").
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

impl DatabaseConfig {
    /// Database path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<PathBuf, ConfigError> {
        expand_env_vars("database.path", &self.path).map(PathBuf::from)
    }

    pub fn is_in_memory(&self) -> bool {
        self.resolved_path()
            .is_ok_and(|path| path == Path::new(IN_MEMORY_PATH))
    }

    /// Parsed checkpoint interval; never zero.
    pub fn checkpoint_duration(&self) -> Result<Duration, ConfigError> {
        parse_interval("database.checkpoint_interval", &self.checkpoint_interval)
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, e.g. `warn,eventviewer=info`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn filter_or_default(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate YAML text. An empty document yields defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first field that is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_blank("database.path", &self.database.path)?;
        self.database.resolved_path()?;
        require_positive("database.channel_capacity", self.database.channel_capacity)?;
        self.database.checkpoint_duration()?;

        if let Some(filter) = &self.logging.filter {
            check_log_filter("logging.filter", filter)?;
        }

        Ok(())
    }
}

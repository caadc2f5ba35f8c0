//! Configuration module for the event viewer.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (path, channel capacity, checkpoint interval)
//! - Logging settings (tracing filter)

mod app;
mod validation;

pub use app::{AppConfig, DEFAULT_LOG_FILTER, DatabaseConfig, LoggingConfig};
pub use validation::{ConfigError, expand_env_vars, parse_interval};

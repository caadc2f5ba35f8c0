//! Field-level checks shared by the config sections.
//!
//! Every check takes the dotted field name (`database.checkpoint_interval`)
//! so that errors point at the offending YAML key.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// `${VAR}` or `${VAR:-default}`.
static ENV_VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var pattern is valid")
});

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value the store cannot run with.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Dotted name of the offending field, if the error is about one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Read { .. } | Self::Parse(_) => None,
        }
    }
}

/// Parse a non-zero humantime interval such as `5s`, `250ms` or `1m 30s`.
///
/// Zero is rejected: a zero checkpoint interval would make the writer spin.
///
/// # Examples
///
/// ```
/// use eventviewer::config::parse_interval;
///
/// let interval = parse_interval("database.checkpoint_interval", "1m 30s").unwrap();
/// assert_eq!(interval.as_secs(), 90);
/// assert!(parse_interval("database.checkpoint_interval", "0s").is_err());
/// ```
pub fn parse_interval(field: &'static str, input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::invalid(field, "duration is empty"));
    }
    let interval = humantime::parse_duration(input)
        .map_err(|e| ConfigError::invalid(field, format!("'{input}': {e}")))?;
    if interval.is_zero() {
        return Err(ConfigError::invalid(field, "duration must be greater than zero"));
    }
    Ok(interval)
}

/// Expand `${VAR}` and `${VAR:-default}` references.
///
/// A referenced variable that is unset and has no default is an error, so a
/// database path never silently collapses to a relative file.
pub fn expand_env_vars(field: &'static str, input: &str) -> Result<String, ConfigError> {
    let mut missing: Option<String> = None;
    let expanded = ENV_VAR_REGEX.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match (std::env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::invalid(
            field,
            format!("environment variable '{name}' is not set and has no default"),
        )),
        None => Ok(expanded.into_owned()),
    }
}

pub(crate) fn require_non_blank(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

pub(crate) fn require_positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

/// Check that `directives` is a valid `EnvFilter`.
pub(crate) fn check_log_filter(field: &'static str, directives: &str) -> Result<(), ConfigError> {
    require_non_blank(field, directives)?;
    EnvFilter::try_new(directives)
        .map(|_| ())
        .map_err(|e| ConfigError::invalid(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: &str = "database.checkpoint_interval";

    #[test]
    fn test_parse_interval_valid() {
        assert_eq!(parse_interval(FIELD, "5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval(FIELD, " 250ms ").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval(FIELD, "1m 30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_interval_rejects_zero() {
        for zero in ["0s", "0ms", "0m"] {
            let err = parse_interval(FIELD, zero).unwrap_err();
            assert_eq!(err.field(), Some(FIELD));
            assert!(err.to_string().contains("greater than zero"));
        }
    }

    #[test]
    fn test_parse_interval_invalid() {
        assert!(parse_interval(FIELD, "").is_err());
        assert!(parse_interval(FIELD, "soon").is_err());
        assert!(parse_interval(FIELD, "30").is_err());
        let err = parse_interval(FIELD, "5x").unwrap_err();
        assert!(err.to_string().starts_with("invalid database.checkpoint_interval"));
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(expand_env_vars("database.path", "events.db").unwrap(), "events.db");
        assert_eq!(expand_env_vars("database.path", ":memory:").unwrap(), ":memory:");
    }

    #[test]
    fn test_expand_env_vars_default() {
        let path = expand_env_vars(
            "database.path",
            "${EVENTVIEWER_UNSET_DATA_DIR_12345:-/var/lib}/events.db",
        )
        .unwrap();
        assert_eq!(path, "/var/lib/events.db");
    }

    #[test]
    fn test_expand_env_vars_missing_is_error() {
        let err = expand_env_vars("database.path", "${EVENTVIEWER_UNSET_VAR_67890}/events.db")
            .unwrap_err();
        assert_eq!(err.field(), Some("database.path"));
        assert!(err.to_string().contains("EVENTVIEWER_UNSET_VAR_67890"));
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("EVENTVIEWER_TEST_DATA_DIR", "/data");
        }
        let path = expand_env_vars("database.path", "${EVENTVIEWER_TEST_DATA_DIR}/events.db");
        assert_eq!(path.unwrap(), "/data/events.db");
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("EVENTVIEWER_TEST_DATA_DIR");
        }
    }

    #[test]
    fn test_check_log_filter() {
        assert!(check_log_filter("logging.filter", "info,eventviewer=debug").is_ok());
        assert!(check_log_filter("logging.filter", "  ").is_err());
        assert!(check_log_filter("logging.filter", "eventviewer=loud").is_err());
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive("database.channel_capacity", 1).is_ok());
        let err = require_positive("database.channel_capacity", 0).unwrap_err();
        assert_eq!(err.field(), Some("database.channel_capacity"));
    }
}

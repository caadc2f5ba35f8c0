//! Database schema definitions and migrations.
//!
//! The schema is versioned explicitly. Each [`Migration`] runs in its own
//! transaction and is recorded in `schema_version`; [`migrate`] applies every
//! step newer than the recorded version and is safe to call on every open.

use std::str::FromStr;

use chrono::Utc;
use duckdb::Connection;

use crate::storage::StorageError;
use crate::storage::predicate::fold_search_text;
use crate::storage::types::{ParameterKind, ParameterValue};

/// Latest schema version known to this build.
pub const SCHEMA_VERSION: i64 = 3;

/// Bookkeeping table for applied migrations.
pub const SCHEMA_VERSION_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     BIGINT NOT NULL,
    description VARCHAR NOT NULL,
    applied_at  BIGINT NOT NULL
);
"#;

/// v1: event records and their owned parameters.
///
/// `record_id` comes from a sequence, so it increases in insertion order.
/// A parameter row sets exactly one value column, selected by `kind`.
pub const V1_BASE_TABLES_DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS event_record_seq START 1;
CREATE TABLE IF NOT EXISTS events (
    record_id  BIGINT NOT NULL DEFAULT nextval('event_record_seq'),
    event_id   VARCHAR NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS parameters (
    record_id    BIGINT NOT NULL,
    key          VARCHAR NOT NULL,
    kind         VARCHAR NOT NULL,
    string_value VARCHAR,
    bool_value   BOOLEAN,
    int_value    BIGINT,
    array_value  VARCHAR
);
"#;

/// v2: display name and folded search key.
pub const V2_NAME_AND_SEARCH_KEY_DDL: &str = r#"
ALTER TABLE events ADD COLUMN name VARCHAR DEFAULT '';
ALTER TABLE events ADD COLUMN search_key VARCHAR DEFAULT '';
"#;

/// v3: lookup and ordering indexes.
pub const V3_INDEXES_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS events_event_id_idx ON events (event_id);
CREATE INDEX IF NOT EXISTS events_created_at_idx ON events (created_at);
CREATE INDEX IF NOT EXISTS parameters_record_id_idx ON parameters (record_id);
"#;

/// One ordered schema step.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    apply: fn(&Connection) -> Result<(), StorageError>,
}

/// All migrations, in ascending version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create events and parameters",
        apply: |conn| Ok(conn.execute_batch(V1_BASE_TABLES_DDL)?),
    },
    Migration {
        version: 2,
        description: "add name and search_key to events",
        apply: add_name_and_search_key,
    },
    Migration {
        version: 3,
        description: "create lookup indexes",
        apply: |conn| Ok(conn.execute_batch(V3_INDEXES_DDL)?),
    },
];

fn add_name_and_search_key(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(V2_NAME_AND_SEARCH_KEY_DDL)?;

    let existing: Vec<(i64, String)> = {
        let mut stmt = conn.prepare("SELECT record_id, event_id FROM events")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let mut update = conn.prepare("UPDATE events SET search_key = ? WHERE record_id = ?")?;
    for (record_id, event_id) in &existing {
        update.execute(duckdb::params![fold_search_text(event_id), record_id])?;
    }

    tracing::debug!(backfilled = existing.len(), "Search keys backfilled");
    Ok(())
}

/// Highest applied schema version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64, StorageError> {
    conn.execute_batch(SCHEMA_VERSION_TABLE_DDL)?;
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// Returns the versions applied by this call (empty when already current).
/// Fails if the database was written by a newer build.
pub fn migrate(conn: &mut Connection) -> Result<Vec<i64>, StorageError> {
    let current = current_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        (migration.apply)(&tx).map_err(|e| {
            StorageError::Migration(format!("v{} ({}): {e}", migration.version, migration.description))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, description, applied_at) VALUES (?, ?, ?)",
            duckdb::params![
                migration.version,
                migration.description,
                Utc::now().timestamp_micros()
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Schema migration applied"
        );
        applied.push(migration.version);
    }

    if applied.is_empty() {
        tracing::debug!(version = current, "Database schema up to date");
    }
    Ok(applied)
}

// =============================================================================
// Parameter column codec
// =============================================================================

/// A parameter value mapped onto the `parameters` value columns.
///
/// Arrays are stored as canonical JSON text, so equality of the text is
/// element-wise, order-sensitive equality of the arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EncodedValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Array(String),
}

impl EncodedValue {
    pub fn encode(value: &ParameterValue) -> Result<Self, StorageError> {
        Ok(match value {
            ParameterValue::String(s) => Self::String(s.clone()),
            ParameterValue::Boolean(b) => Self::Boolean(*b),
            ParameterValue::Integer(n) => Self::Integer(*n),
            ParameterValue::Array(items) => Self::Array(serde_json::to_string(items)?),
        })
    }

    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::String(_) => ParameterKind::String,
            Self::Boolean(_) => ParameterKind::Boolean,
            Self::Integer(_) => ParameterKind::Integer,
            Self::Array(_) => ParameterKind::Array,
        }
    }

    /// Name of the column holding this variant.
    pub fn column(&self) -> &'static str {
        match self {
            Self::String(_) => "string_value",
            Self::Boolean(_) => "bool_value",
            Self::Integer(_) => "int_value",
            Self::Array(_) => "array_value",
        }
    }

    pub fn into_sql_value(self) -> Box<dyn duckdb::ToSql> {
        match self {
            Self::String(s) | Self::Array(s) => Box::new(s),
            Self::Boolean(b) => Box::new(b),
            Self::Integer(n) => Box::new(n),
        }
    }

    /// Values for `(string_value, bool_value, int_value, array_value)`.
    pub fn columns(&self) -> (Option<&str>, Option<bool>, Option<i64>, Option<&str>) {
        match self {
            Self::String(s) => (Some(s), None, None, None),
            Self::Boolean(b) => (None, Some(*b), None, None),
            Self::Integer(n) => (None, None, Some(*n), None),
            Self::Array(s) => (None, None, None, Some(s)),
        }
    }

    /// Rebuild a value from a stored row. A row whose selected column is NULL
    /// has no variant set and is rejected.
    pub fn decode(
        key: &str,
        kind: &str,
        string_value: Option<String>,
        bool_value: Option<bool>,
        int_value: Option<i64>,
        array_value: Option<String>,
    ) -> Result<ParameterValue, StorageError> {
        let kind = ParameterKind::from_str(kind).map_err(|_| {
            StorageError::InvalidData(format!("parameter '{key}' has unknown kind '{kind}'"))
        })?;
        let missing = || StorageError::InvalidData(format!("parameter '{key}' has no {kind} value"));

        match kind {
            ParameterKind::String => string_value.map(ParameterValue::String).ok_or_else(missing),
            ParameterKind::Boolean => bool_value.map(ParameterValue::Boolean).ok_or_else(missing),
            ParameterKind::Integer => int_value.map(ParameterValue::Integer).ok_or_else(missing),
            ParameterKind::Array => {
                let raw = array_value.ok_or_else(missing)?;
                Ok(ParameterValue::Array(serde_json::from_str(&raw)?))
            }
        }
    }
}

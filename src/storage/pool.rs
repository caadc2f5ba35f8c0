//! Reader connections for synchronous queries.

use std::sync::{Arc, Mutex};

use duckdb::Connection;

use crate::storage::StorageError;

/// Source of reader connections.
///
/// Holds a connection cloned from the writer's. DuckDB connections from
/// `try_clone()` share the same database instance, so readers see every
/// committed write without waiting for a checkpoint.
pub struct ReadPool {
    base: Mutex<Connection>,
}

impl ReadPool {
    pub fn new(base: Connection) -> Arc<Self> {
        Arc::new(Self {
            base: Mutex::new(base),
        })
    }

    /// Get a fresh connection to the shared database.
    pub fn get(&self) -> Result<Connection, StorageError> {
        let base = self
            .base
            .lock()
            .map_err(|_| StorageError::Internal("reader pool lock poisoned".to_string()))?;
        Ok(base.try_clone()?)
    }
}

//! Storage builder and the event store handle.
//!
//! Provides a builder pattern for constructing the storage layer and
//! [`EventStore`], the single handle the rest of the crate talks to.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{ConfigError, DatabaseConfig};
use crate::storage::StorageError;
use crate::storage::actor::{DbActor, IN_MEMORY_PATH};
use crate::storage::observer::{Observers, Subscription};
use crate::storage::pool::ReadPool;
use crate::storage::predicate::Predicate;
use crate::storage::types::{Event, EventId, EventRecord, ParameterSet};
use crate::storage::{EventReader, EventWriter, PendingClear, StorageAdmin};

/// Default channel capacity for writer commands.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default checkpoint interval.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    db_path: PathBuf,
    channel_capacity: usize,
    checkpoint_interval: Duration,
}

impl StorageBuilder {
    /// Create a new storage builder for a database file.
    ///
    /// Pass [`IN_MEMORY_PATH`] (or use [`StorageBuilder::in_memory`]) for a
    /// database that lives only as long as the store.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH)
    }

    /// Builder populated from the `database` config section.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.resolved_path()?)
            .channel_capacity(config.channel_capacity)
            .checkpoint_interval(config.checkpoint_duration()?))
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the checkpoint interval.
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Open the database, run migrations and start the writer.
    pub fn build(self) -> Result<EventStore, StorageError> {
        if self.channel_capacity == 0 {
            return Err(StorageError::Internal(
                "channel capacity must be greater than zero".to_string(),
            ));
        }
        if self.checkpoint_interval.is_zero() {
            return Err(StorageError::Internal(
                "checkpoint interval must be greater than zero".to_string(),
            ));
        }

        // Create parent directory if it doesn't exist
        if self.db_path != Path::new(IN_MEMORY_PATH)
            && let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let observers = Observers::new();
        let (actor_handle, tx, reader_conn) = DbActor::spawn(
            &self.db_path,
            self.channel_capacity,
            self.checkpoint_interval,
            Arc::clone(&observers),
        )?;

        tracing::info!(path = %self.db_path.display(), "Event store opened");

        Ok(EventStore {
            writer: EventWriter::new(tx.clone()),
            reader: EventReader::new(ReadPool::new(reader_conn)),
            admin: StorageAdmin::new(tx),
            observers,
            actor_handle: Some(actor_handle),
        })
    }
}

/// Persistent store of captured events.
///
/// Captures are queued and applied in submission order by a single writer
/// thread. Queries read committed data synchronously. Query failures are
/// logged and reported as the empty answer (`0`, `false`, `None` or an empty
/// list), so callers never have to handle storage errors on the read path.
///
/// The store is `Send + Sync`; share it behind an `Arc` to capture from
/// several threads.
pub struct EventStore {
    writer: EventWriter,
    reader: EventReader,
    admin: StorageAdmin,
    observers: Arc<Observers>,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("subscribers", &self.observers.len())
            .field("running", &self.actor_handle.is_some())
            .finish_non_exhaustive()
    }
}

impl EventStore {
    /// Open (or create) a store at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        StorageBuilder::new(path).build()
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        StorageBuilder::in_memory().build()
    }

    /// Record an occurrence of `event`.
    ///
    /// `created_at` defaults to now. Returns once the capture is queued; the
    /// record becomes visible to queries after the writer commits it (see
    /// [`EventStore::sync`]). Failures are logged, never returned.
    pub fn capture(&self, event: Event, created_at: Option<DateTime<Utc>>) {
        let created_at = created_at.unwrap_or_else(Utc::now);
        let id = event.id.clone();
        if let Err(e) = self.writer.capture(event, created_at) {
            tracing::error!(error = %e, event_id = %id, "Failed to queue capture");
        }
    }

    /// Total number of stored records.
    pub fn count(&self) -> usize {
        self.reader.count().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to count events");
            0
        })
    }

    /// Whether a record with identifier `id` exists whose parameters contain
    /// every pair in `filter`.
    pub fn exists(&self, id: &EventId, filter: Option<&ParameterSet>) -> bool {
        let predicate = Predicate::for_event(id, filter);
        self.reader.exists(&predicate).unwrap_or_else(|e| {
            tracing::error!(error = %e, event_id = %id, "Failed to check event existence");
            false
        })
    }

    /// Latest `created_at` among records matching `id` and `filter`.
    pub fn last_timestamp(
        &self,
        id: &EventId,
        filter: Option<&ParameterSet>,
    ) -> Option<DateTime<Utc>> {
        let predicate = Predicate::for_event(id, filter);
        self.reader.last_timestamp(&predicate).unwrap_or_else(|e| {
            tracing::error!(error = %e, event_id = %id, "Failed to read last timestamp");
            None
        })
    }

    /// Page of records, most recent first.
    ///
    /// `limit == 0` means no limit. A blank `search` means no filter;
    /// otherwise only records whose identifier contains it (ignoring case
    /// and diacritics) are returned.
    pub fn list(&self, limit: usize, offset: usize, search: Option<&str>) -> Vec<EventRecord> {
        let predicate = search
            .and_then(Predicate::id_contains)
            .unwrap_or(Predicate::True);
        self.reader
            .list(&predicate, limit, offset)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, limit, offset, "Failed to list events");
                Vec::new()
            })
    }

    /// Record by storage identity.
    pub fn get(&self, record_id: i64) -> Option<EventRecord> {
        self.reader.get(record_id).unwrap_or_else(|e| {
            tracing::error!(error = %e, record_id, "Failed to load event");
            None
        })
    }

    /// Remove one record and its parameters.
    ///
    /// Applied after every capture queued before it. Returns `false` when the
    /// record no longer exists or the delete failed.
    pub fn delete(&self, record: &EventRecord) -> bool {
        self.delete_by_id(record.record_id)
    }

    pub fn delete_by_id(&self, record_id: i64) -> bool {
        match self.admin.delete(record_id) {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::error!(error = %e, record_id, "Failed to delete event");
                false
            }
        }
    }

    /// Remove every record in one transaction.
    ///
    /// Returns immediately. The clear runs after all previously queued
    /// captures; the handle reports completion to whoever holds it.
    pub fn clear(&self) -> PendingClear {
        self.admin.clear().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to queue clear");
            PendingClear::failed(e)
        })
    }

    /// Receive a notification for every committed capture.
    ///
    /// A subscription buffers up to [`SUBSCRIPTION_CAPACITY`] notifications;
    /// captures committed while it is full are not delivered to it.
    ///
    /// [`SUBSCRIPTION_CAPACITY`]: crate::storage::SUBSCRIPTION_CAPACITY
    pub fn subscribe(&self) -> Subscription {
        self.observers.subscribe()
    }

    /// Block until every capture queued so far is committed.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.writer.sync()
    }

    pub fn writer(&self) -> &EventWriter {
        &self.writer
    }

    pub fn reader(&self) -> &EventReader {
        &self.reader
    }

    pub fn admin(&self) -> &StorageAdmin {
        &self.admin
    }

    /// Gracefully shutdown the storage layer.
    ///
    /// Pending commands are applied, the database is checkpointed and the
    /// writer thread is joined.
    pub fn shutdown(mut self) -> Result<(), StorageError> {
        self.admin.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| StorageError::Internal("Failed to join actor thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        // Try graceful shutdown if not already done
        if self.actor_handle.is_some() {
            let _ = self.admin.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreNotification;
    use crate::storage::types::ParameterValue;
    use tempfile::tempdir;

    fn event(id: &str) -> Event {
        Event::new(EventId::new(id).unwrap(), id)
    }

    #[test]
    fn test_build_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("deeper").join("events.db");

        let store = StorageBuilder::new(&db_path).build().unwrap();
        assert!(db_path.parent().unwrap().exists());
        store.shutdown().unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_from_config_in_memory() {
        let config = DatabaseConfig {
            path: ":memory:".to_string(),
            channel_capacity: 4,
            checkpoint_interval: "100ms".to_string(),
        };
        let store = StorageBuilder::from_config(&config).unwrap().build().unwrap();
        store.capture(event("sign_up"), None);
        store.sync().unwrap();
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let err = StorageBuilder::in_memory().channel_capacity(0).build();
        assert!(matches!(err, Err(StorageError::Internal(_))));
    }

    #[test]
    fn test_zero_checkpoint_interval_rejected() {
        let err = StorageBuilder::in_memory()
            .checkpoint_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("checkpoint interval"));

        let config = DatabaseConfig {
            path: ":memory:".to_string(),
            checkpoint_interval: "0s".to_string(),
            ..Default::default()
        };
        assert!(StorageBuilder::from_config(&config).is_err());
    }

    #[test]
    fn test_storage_roundtrip() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("roundtrip.db");

        {
            let store = StorageBuilder::new(&db_path)
                .checkpoint_interval(Duration::from_millis(50))
                .build()
                .unwrap();
            for i in 0..5 {
                store.capture(event(&format!("target_{i}")).with_parameter("i", i), None);
            }
            store.shutdown().unwrap();
        }

        let store = EventStore::open(&db_path).unwrap();
        assert_eq!(store.count(), 5);
        let newest = &store.list(1, 0, None)[0];
        assert_eq!(newest.id.as_str(), "target_4");
        assert_eq!(newest.parameter("i"), Some(&ParameterValue::Integer(4)));
    }

    #[test]
    fn test_capture_uses_explicit_timestamp() {
        let store = EventStore::open_in_memory().unwrap();
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        store.capture(event("login"), Some(at));
        store.sync().unwrap();

        let id = EventId::new("login").unwrap();
        assert_eq!(store.last_timestamp(&id, None), Some(at));
        assert_eq!(store.list(0, 0, None)[0].created_at, at);
    }

    #[test]
    fn test_delete_and_get() {
        let store = EventStore::open_in_memory().unwrap();
        store.capture(event("login"), None);
        store.sync().unwrap();

        let record = store.list(0, 0, None).remove(0);
        assert_eq!(store.get(record.record_id), Some(record.clone()));
        assert!(store.delete(&record));
        assert!(!store.delete(&record));
        assert_eq!(store.get(record.record_id), None);
    }

    #[test]
    fn test_subscribe_sees_captures() {
        let store = EventStore::open_in_memory().unwrap();
        let sub = store.subscribe();

        store.capture(event("logout"), None);
        let note = sub.recv_timeout(Duration::from_secs(5)).unwrap();
        let StoreNotification::Captured { event_id, .. } = note;
        assert_eq!(event_id.as_str(), "logout");

        sub.unsubscribe();
        assert!(format!("{store:?}").contains("subscribers: 0"));
    }

    #[test]
    fn test_drop_flushes_pending_captures() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("drop.db");

        {
            let store = EventStore::open(&db_path).unwrap();
            for _ in 0..20 {
                store.capture(event("view_screen"), None);
            }
        }

        let store = EventStore::open(&db_path).unwrap();
        assert_eq!(store.count(), 20);
    }
}

//! Writer actor with dedicated connection and MPSC channel.
//!
//! Single-writer pattern: one thread owns the write connection and processes
//! commands from a bounded channel strictly in arrival order. Captures, deletes
//! and bulk clears therefore never interleave, and captures commit in the order
//! they were submitted.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use duckdb::Connection;

use crate::storage::StorageError;
use crate::storage::observer::{Observers, StoreNotification};
use crate::storage::predicate::fold_search_text;
use crate::storage::schema::{EncodedValue, migrate};
use crate::storage::types::Event;

/// Path value that selects an in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Name of the writer thread.
const WRITER_THREAD_NAME: &str = "eventviewer-writer";

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Persist a new event record, then notify observers.
    Capture {
        event: Event,
        created_at: DateTime<Utc>,
    },
    /// Delete one record and its parameters; replies with whether a row was removed.
    Delete {
        record_id: i64,
        reply: SyncSender<Result<bool, StorageError>>,
    },
    /// Delete every record in one transaction.
    Clear {
        reply: SyncSender<Result<(), StorageError>>,
    },
    /// Reply once every earlier command has been processed.
    Sync { reply: SyncSender<()> },
    /// Force checkpoint.
    Checkpoint,
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Actor
// =============================================================================

/// Open the database file (or an in-memory database) and bring its schema up to date.
pub fn open_database(db_path: &Path) -> Result<Connection, StorageError> {
    let mut conn = if db_path == Path::new(IN_MEMORY_PATH) {
        Connection::open_in_memory()?
    } else {
        Connection::open(db_path)?
    };
    migrate(&mut conn)?;
    Ok(conn)
}

/// Database writer actor.
pub struct DbActor {
    conn: Connection,
    rx: Receiver<Command>,
    observers: Arc<Observers>,
    last_checkpoint: Instant,
    checkpoint_interval: Duration,
}

impl DbActor {
    /// Spawn the writer actor thread.
    ///
    /// Returns a tuple of:
    /// - `JoinHandle<()>`: Handle to the actor thread
    /// - `SyncSender<Command>`: Channel sender for commands
    /// - `Connection`: A connection to the same database instance for readers
    pub fn spawn(
        db_path: &Path,
        channel_capacity: usize,
        checkpoint_interval: Duration,
        observers: Arc<Observers>,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>, Connection), StorageError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);
        let conn = open_database(db_path)?;

        // Created before the writer moves to its thread so readers share
        // the same database instance and see commits immediately.
        let reader_conn = conn.try_clone()?;

        let mut actor = DbActor {
            conn,
            rx,
            observers,
            last_checkpoint: Instant::now(),
            checkpoint_interval,
        };
        let handle = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || actor.run())
            .map_err(|e| StorageError::Internal(format!("failed to spawn writer thread: {e}")))?;

        Ok((handle, tx, reader_conn))
    }

    fn run(&mut self) {
        tracing::info!("DbActor started");

        loop {
            let deadline = self.last_checkpoint + self.checkpoint_interval;
            let timeout = deadline.saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        break; // Shutdown requested
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Timeout: checkpoint overdue
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Channel disconnected, shutting down");
                    let _ = self.checkpoint();
                    break;
                }
            }

            if self.last_checkpoint.elapsed() >= self.checkpoint_interval {
                if let Err(e) = self.checkpoint() {
                    tracing::error!(error = %e, "Periodic checkpoint failed");
                }
                self.last_checkpoint = Instant::now();
            }
        }

        tracing::info!("DbActor stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Capture { event, created_at } => match self.insert_event(&event, created_at) {
                Ok(record_id) => {
                    tracing::debug!(record_id, event_id = %event.id, "Event captured");
                    self.observers.notify(&StoreNotification::Captured {
                        record_id,
                        event_id: event.id,
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, event_id = %event.id, "Event capture failed");
                }
            },
            Command::Delete { record_id, reply } => {
                let result = self.delete_record(record_id);
                if let Err(ref e) = result {
                    tracing::error!(error = %e, record_id, "Event delete failed");
                }
                let _ = reply.send(result);
            }
            Command::Clear { reply } => {
                let result = self.clear_all();
                if let Err(ref e) = result {
                    tracing::error!(error = %e, "Event store clear failed");
                }
                // Receiver may have been dropped: nobody asked for completion.
                let _ = reply.send(result);
            }
            Command::Sync { reply } => {
                let _ = reply.send(());
            }
            Command::Checkpoint => {
                if let Err(e) = self.checkpoint() {
                    tracing::error!(error = %e, "Checkpoint failed");
                }
            }
            Command::Shutdown => {
                tracing::info!("DbActor shutting down");
                let _ = self.checkpoint();
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Insert one record and its parameters in a single transaction.
    fn insert_event(&mut self, event: &Event, created_at: DateTime<Utc>) -> Result<i64, StorageError> {
        let encoded = event
            .parameters
            .iter()
            .map(|(key, value)| Ok((key, EncodedValue::encode(value)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        let tx = self.conn.transaction()?;
        let record_id: i64 = tx.query_row(
            "INSERT INTO events (event_id, name, created_at, search_key)
             VALUES (?, ?, ?, ?)
             RETURNING record_id",
            duckdb::params![
                event.id.as_str(),
                &event.name,
                created_at.timestamp_micros(),
                fold_search_text(event.id.as_str()),
            ],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO parameters (record_id, key, kind, string_value, bool_value, int_value, array_value)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (key, value) in &encoded {
                let (string_value, bool_value, int_value, array_value) = value.columns();
                stmt.execute(duckdb::params![
                    record_id,
                    *key,
                    value.kind().as_ref(),
                    string_value,
                    bool_value,
                    int_value,
                    array_value,
                ])?;
            }
        }
        tx.commit()?;

        Ok(record_id)
    }

    fn delete_record(&mut self, record_id: i64) -> Result<bool, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM parameters WHERE record_id = ?", [record_id])?;
        let deleted = tx.execute("DELETE FROM events WHERE record_id = ?", [record_id])?;
        tx.commit()?;

        tracing::debug!(record_id, deleted, "Event deleted");
        Ok(deleted > 0)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM parameters", [])?;
        let deleted = tx.execute("DELETE FROM events", [])?;
        tx.commit()?;

        tracing::info!(deleted, "Event store cleared");
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("CHECKPOINT;")?;
        tracing::debug!("WAL checkpoint completed");
        Ok(())
    }
}

//! Storage facades.
//!
//! Provides the building blocks behind [`EventStore`](crate::storage::EventStore):
//! - `EventWriter`: Fire-and-forget captures via MPSC
//! - `EventReader`: Synchronous queries on a reader connection
//! - `StorageAdmin`: Delete, bulk clear and maintenance commands
//!
//! Every facade method returns `Result`; the store decides how failures surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::Connection;

use crate::storage::StorageError;
use crate::storage::actor::Command;
use crate::storage::pool::ReadPool;
use crate::storage::predicate::{Predicate, SqlFilter};
use crate::storage::schema::EncodedValue;
use crate::storage::types::{Event, EventId, EventRecord, Parameter};

// =============================================================================
// Writer
// =============================================================================

/// Event writer.
///
/// `capture` blocks only while the command channel is full; the write itself
/// happens later on the actor thread.
#[derive(Clone)]
pub struct EventWriter {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWriter").finish_non_exhaustive()
    }
}

impl EventWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Queue an event for persistence with the given creation time.
    pub fn capture(&self, event: Event, created_at: DateTime<Utc>) -> Result<(), StorageError> {
        self.tx
            .send(Command::Capture { event, created_at })
            .map_err(|_| StorageError::ChannelSend)
    }

    /// Block until every previously queued write has been applied.
    pub fn sync(&self) -> Result<(), StorageError> {
        let (reply, done) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Sync { reply })
            .map_err(|_| StorageError::ChannelSend)?;
        done.recv().map_err(|_| StorageError::ChannelRecv)
    }
}

// =============================================================================
// Reader
// =============================================================================

const LIST_COLUMNS: &str = "e.record_id, e.event_id, e.name, e.created_at";
const LIST_ORDER: &str = "ORDER BY e.created_at DESC, e.record_id DESC";

/// Event reader.
#[derive(Clone)]
pub struct EventReader {
    pool: Arc<ReadPool>,
}

impl std::fmt::Debug for EventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader").finish_non_exhaustive()
    }
}

impl EventReader {
    pub(crate) fn new(pool: Arc<ReadPool>) -> Self {
        Self { pool }
    }

    /// Total number of records.
    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| StorageError::InvalidData(format!("negative count {count}")))
    }

    /// Whether any record matches.
    pub fn exists(&self, predicate: &Predicate) -> Result<bool, StorageError> {
        let conn = self.pool.get()?;
        let SqlFilter { sql, params } = predicate.to_sql()?;
        let query = format!("SELECT EXISTS (SELECT 1 FROM events e WHERE {sql})");
        let found: bool = conn.query_row(&query, param_refs(&params).as_slice(), |row| row.get(0))?;
        Ok(found)
    }

    /// Most recent `created_at` among matching records.
    pub fn last_timestamp(&self, predicate: &Predicate) -> Result<Option<DateTime<Utc>>, StorageError> {
        let conn = self.pool.get()?;
        let SqlFilter { sql, params } = predicate.to_sql()?;
        let query = format!("SELECT MAX(e.created_at) FROM events e WHERE {sql}");
        let micros: Option<i64> =
            conn.query_row(&query, param_refs(&params).as_slice(), |row| row.get(0))?;
        Ok(micros.map(from_micros))
    }

    /// One page of matching records, most recent first.
    ///
    /// `limit == 0` returns every record after `offset`. Ties on `created_at`
    /// are broken by `record_id`, latest insertion first.
    pub fn list(
        &self,
        predicate: &Predicate,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let conn = self.pool.get()?;
        let SqlFilter { sql, params } = predicate.to_sql()?;

        let mut page = format!("SELECT {LIST_COLUMNS} FROM events e WHERE {sql} {LIST_ORDER}");
        if limit > 0 {
            page.push_str(&format!(" LIMIT {limit}"));
        }
        if offset > 0 {
            page.push_str(&format!(" OFFSET {offset}"));
        }

        let rows = {
            let mut stmt = conn.prepare(&page)?;
            let rows = stmt.query_map(param_refs(&params).as_slice(), read_event_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // Bound to the ids already read: re-running the page query would see
        // captures committed in between.
        let record_ids: Vec<i64> = rows.iter().map(|row| row.record_id).collect();
        let mut parameters = load_parameters(&conn, &record_ids)?;

        rows.into_iter()
            .map(|row| row.into_record(&mut parameters))
            .collect()
    }

    /// Single record by storage identity.
    pub fn get(&self, record_id: i64) -> Result<Option<EventRecord>, StorageError> {
        let conn = self.pool.get()?;
        let rows = {
            let mut stmt =
                conn.prepare(&format!("SELECT {LIST_COLUMNS} FROM events e WHERE e.record_id = ?"))?;
            let rows = stmt.query_map([record_id], read_event_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let mut parameters = load_parameters(&conn, &[record_id])?;
        row.into_record(&mut parameters).map(Some)
    }
}

/// Raw `events` row before identifier validation.
struct EventRow {
    record_id: i64,
    event_id: String,
    name: Option<String>,
    created_at: i64,
}

impl EventRow {
    fn into_record(
        self,
        parameters: &mut HashMap<i64, Vec<Parameter>>,
    ) -> Result<EventRecord, StorageError> {
        let id = EventId::new(self.event_id).map_err(|e| {
            StorageError::InvalidData(format!("record {}: {e}", self.record_id))
        })?;
        Ok(EventRecord {
            record_id: self.record_id,
            id,
            name: self.name.unwrap_or_default(),
            created_at: from_micros(self.created_at),
            parameters: parameters.remove(&self.record_id).unwrap_or_default(),
        })
    }
}

fn read_event_row(row: &duckdb::Row<'_>) -> duckdb::Result<EventRow> {
    Ok(EventRow {
        record_id: row.get(0)?,
        event_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Load parameters for `record_ids`, grouped by record and ordered by key.
/// Rows that cannot be decoded are skipped.
fn load_parameters(
    conn: &Connection,
    record_ids: &[i64],
) -> Result<HashMap<i64, Vec<Parameter>>, StorageError> {
    if record_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; record_ids.len()].join(", ");
    let query = format!(
        "SELECT record_id, key, kind, string_value, bool_value, int_value, array_value
         FROM parameters
         WHERE record_id IN ({placeholders})
         ORDER BY record_id, key"
    );
    let ids: Vec<&dyn duckdb::ToSql> = record_ids.iter().map(|id| id as &dyn duckdb::ToSql).collect();
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(ids.as_slice(), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<bool>>(4)?,
            row.get::<_, Option<i64>>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut grouped: HashMap<i64, Vec<Parameter>> = HashMap::new();
    for row in rows {
        let (record_id, key, kind, string_value, bool_value, int_value, array_value) = row?;
        match EncodedValue::decode(&key, &kind, string_value, bool_value, int_value, array_value) {
            Ok(value) => grouped
                .entry(record_id)
                .or_default()
                .push(Parameter { key, value }),
            Err(e) => {
                tracing::warn!(error = %e, record_id, key = %key, "Skipping undecodable parameter");
            }
        }
    }
    Ok(grouped)
}

fn param_refs(params: &[Box<dyn duckdb::ToSql>]) -> Vec<&dyn duckdb::ToSql> {
    params.iter().map(|p| p.as_ref()).collect()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

// =============================================================================
// Admin
// =============================================================================

/// Completion handle for a bulk clear.
///
/// The result is delivered to whichever thread polls or waits on this handle.
/// Dropping it discards the result.
#[derive(Debug)]
pub struct PendingClear {
    rx: Receiver<Result<(), StorageError>>,
}

impl PendingClear {
    /// A handle that is already resolved with `err`.
    pub(crate) fn failed(err: StorageError) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Block until the clear has run.
    pub fn wait(self) -> Result<(), StorageError> {
        self.rx.recv().map_err(|_| StorageError::ChannelRecv)?
    }

    /// Wait up to `timeout`; `None` if the clear has not finished yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), StorageError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StorageError::ChannelRecv)),
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&self) -> Option<Result<(), StorageError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StorageError::ChannelRecv)),
        }
    }
}

/// Storage administration.
#[derive(Clone)]
pub struct StorageAdmin {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdmin").finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Delete one record, waiting for the writer to apply it.
    pub fn delete(&self, record_id: i64) -> Result<bool, StorageError> {
        let (reply, result) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Delete { record_id, reply })
            .map_err(|_| StorageError::ChannelSend)?;
        result.recv().map_err(|_| StorageError::ChannelRecv)?
    }

    /// Queue a bulk clear behind any pending writes.
    pub fn clear(&self) -> Result<PendingClear, StorageError> {
        let (reply, rx) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Clear { reply })
            .map_err(|_| StorageError::ChannelSend)?;
        Ok(PendingClear { rx })
    }

    pub fn checkpoint(&self) -> Result<(), StorageError> {
        self.tx
            .try_send(Command::Checkpoint)
            .map_err(|_| StorageError::ChannelSend)
    }

    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| StorageError::ChannelSend)
    }
}

//! Storage Layer
//!
//! Embedded DuckDB storage with read/write separation:
//! - **Writer**: Dedicated thread with exclusive writes fed by a bounded mpsc channel
//! - **Reader**: Connections cloned from the writer's database instance for synchronous reads
//!
//! # Components
//!
//! - [`EventStore`]: The store handle used by applications
//! - [`EventWriter`] / [`EventReader`] / [`StorageAdmin`]: Lower-level facades that return errors
//! - [`Predicate`]: Query filters shared by SQL and in-memory evaluation
//! - [`Subscription`]: Capture notifications
//! - [`StorageBuilder`]: Initialization and lifecycle management

mod actor;
mod builder;
mod error;
mod facades;
mod observer;
mod pool;
mod predicate;
pub mod schema;
mod types;

pub use actor::IN_MEMORY_PATH;
pub use builder::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL, EventStore, StorageBuilder,
};
pub use error::StorageError;
pub use facades::{EventReader, EventWriter, PendingClear, StorageAdmin};
pub use observer::{SUBSCRIPTION_CAPACITY, StoreNotification, Subscription};
pub use predicate::{Predicate, fold_search_text};
pub use types::{
    Event, EventError, EventId, EventRecord, Parameter, ParameterKind, ParameterSet,
    ParameterValue,
};

//! Event Viewer - Embedded Analytics Event Store
//!
//! This crate records analytics events (an identifier, a display name and a
//! set of typed parameters) into an embedded DuckDB database and answers the
//! questions an event viewer asks of them. It can be used as a library, or
//! driven from the command line with the `eventviewer` executable.
//!
//! # Architecture
//!
//! - **Storage**: Single-writer actor plus synchronous readers over DuckDB
//! - **Registry**: Predefined events emitted by the viewer itself
//! - **Config**: YAML configuration with environment overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use eventviewer::{EventStore, ParameterSet, registry};
//!
//! let store = EventStore::open("./events.db")?;
//! store.capture(registry::present_scene("login"), None);
//! store.sync()?;
//!
//! let id = registry::Predefined::PresentScene.id();
//! let filter = ParameterSet::new().with("scene", "login");
//! assert!(store.exists(&id, Some(&filter)));
//! # Ok::<(), eventviewer::StorageError>(())
//! ```

pub mod config;
pub mod registry;
pub mod storage;

pub use storage::{
    Event, EventError, EventId, EventRecord, EventStore, Parameter, ParameterSet, ParameterValue,
    PendingClear, Predicate, StorageBuilder, StorageError, StoreNotification, Subscription,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

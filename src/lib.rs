//! # Tick Database
//!
//! An embedded time-series database for market data: ordered streams of
//! timestamped, typed, per-instrument messages, written through buffered
//! loaders and read through merge cursors.
//!
//! ## Core Concepts
//!
//! - **Streams**: Append-only message sequences partitioned by entity and type
//! - **Loaders**: Buffered writers; data becomes visible on `flush`
//! - **Cursors**: Time-ordered merges over several streams, filtered by type
//!   and entity, forward or reverse, optionally tailing live data
//! - **Registries**: Stable numeric ids for type names and symbols per stream
//!
//! ## Example
//!
//! ```ignore
//! use tickdb::{FieldValue, LoadingOptions, MessageInput, SelectionOptions, StreamOptions, TickDb, Timestamp};
//!
//! let db = TickDb::in_memory();
//! let stream = db.create_stream("bars", StreamOptions::polymorphic(vec![]))?;
//!
//! let mut loader = stream.create_loader(LoadingOptions::default())?;
//! loader.send(
//!     MessageInput::new("bar", "AAPL", Timestamp::from_millis(1000))
//!         .with_field("close", FieldValue::Float(187.5)),
//! )?;
//! loader.flush()?;
//!
//! let mut cursor = stream.create_cursor(SelectionOptions::default())?;
//! while let Some(message) = cursor.next()? {
//!     println!("{} {} {}", message.timestamp, message.symbol, message.type_name);
//! }
//! ```

pub mod cursor;
pub mod db;
pub mod error;
pub mod loader;
pub mod records;
pub mod registry;
pub mod stream;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cursor::{CursorCloser, NextResult, TickCursor};
pub use db::{TickDb, TickDbConfig};
pub use error::{Result, TickDbError};
pub use loader::TickLoader;
pub use registry::{EntityRegistry, TypeRegistry};
pub use stream::TickStream;
pub use subscriptions::{Selection, SubscriptionFilter};
pub use types::*;

//! Stream storage.
//!
//! Committed messages live in an in-memory index partitioned by entity and
//! type. Databases opened on a directory also append every change to a
//! checksummed stream file that is replayed on open.

mod index;
mod log;

pub use index::{space_of, MessageIndex, MessageKey, Partition, DEFAULT_SPACE};
pub use log::{LogEntry, LoggedMessage, StreamFile};

//! Read path: sources, the merge, and the public cursor.

mod live;
mod merge;
mod source;

pub use live::{CursorCloser, NextResult, TickCursor};

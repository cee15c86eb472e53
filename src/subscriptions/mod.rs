//! Cursor subscriptions.
//!
//! - `SubscriptionFilter` holds the streams, types and entities a cursor reads.
//! - `WakeManager` wakes live cursors when their streams commit new data.

mod filter;
mod manager;

pub use filter::{Selection, SubscriptionFilter};
pub use manager::{WakeManager, WakerId};

//! Wake-on-commit fan-out for live cursors.
//!
//! Each live cursor owns a single-slot channel and registers its sender with
//! every stream it reads. A commit sends one token to every registered sender.
//! A full slot already holds a pending wake, so tokens coalesce; disconnected
//! senders belong to dropped cursors and are removed.

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle for a registered waker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WakerId(u64);

/// Registered wake channels for one stream.
pub struct WakeManager {
    wakers: RwLock<HashMap<WakerId, Sender<()>>>,
    next_id: AtomicU64,
}

impl WakeManager {
    pub fn new() -> Self {
        Self {
            wakers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a wake channel.
    pub fn register(&self, sender: Sender<()>) -> WakerId {
        let id = WakerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.wakers.write().insert(id, sender);
        id
    }

    pub fn unregister(&self, id: WakerId) {
        self.wakers.write().remove(&id);
    }

    pub fn waker_count(&self) -> usize {
        self.wakers.read().len()
    }

    /// Wake every registered cursor. Drops wakers whose cursor is gone.
    pub fn notify_all(&self) {
        let mut to_remove = Vec::new();

        {
            let wakers = self.wakers.read();
            for (id, sender) in wakers.iter() {
                if let Err(TrySendError::Disconnected(_)) = sender.try_send(()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut wakers = self.wakers.write();
            for id in to_remove {
                wakers.remove(&id);
            }
        }
    }
}

impl Default for WakeManager {
    fn default() -> Self {
        Self::new()
    }
}

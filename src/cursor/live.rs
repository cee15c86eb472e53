//! Public cursor with live tailing.
//!
//! `TickCursor` turns merge steps into cursor results. A historical cursor
//! treats a stalled merge as the end; a live cursor reports `Pending` and its
//! blocking `next` parks on a wake channel that commits to its streams (and
//! `CursorCloser::close`) signal.

use super::merge::{MergeCursor, Step};
use crate::error::{Result, TickDbError};
use crate::stream::TickStream;
use crate::subscriptions::{Selection, SubscriptionFilter};
use crate::types::{Message, SelectionOptions, Timestamp};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Result of a non-blocking read.
#[derive(Debug, Clone, PartialEq)]
pub enum NextResult {
    Available(Arc<Message>),
    /// Nothing now; a live cursor may produce more later.
    Pending,
    /// Nothing can satisfy the current range and filter.
    EndOfCursor,
}

/// Closes a cursor from another thread, failing a blocked `next` with
/// `TickDbError::Closed`.
#[derive(Clone)]
pub struct CursorCloser {
    closed: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl CursorCloser {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
    }
}

/// Cursor over one or more streams.
pub struct TickCursor {
    merge: MergeCursor,
    live: bool,

    closed: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl TickCursor {
    pub(crate) fn open(
        streams: Vec<TickStream>,
        time: Timestamp,
        options: SelectionOptions,
        types: Selection,
        entities: Selection,
    ) -> Result<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        let live = options.is_live();
        let filter = SubscriptionFilter::new(streams, types, entities);
        let merge = MergeCursor::new(filter, &options, live.then(|| wake_tx.clone()));

        let mut cursor = Self {
            merge,
            live,
            closed: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        };
        cursor.merge.reset(time, None)?;

        debug!(live, reverse = options.reverse, time = %time, "opened cursor");
        Ok(cursor)
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.merge.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TickDbError::InvalidState("Cursor is closed".into()));
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<NextResult> {
        Ok(match self.merge.step()? {
            Step::Ready(message) => NextResult::Available(message),
            Step::Pending | Step::Idle if self.live => NextResult::Pending,
            Step::Pending | Step::Idle | Step::Exhausted => NextResult::EndOfCursor,
        })
    }

    /// Read the next message without blocking.
    pub fn next_if_available(&mut self) -> Result<NextResult> {
        self.ensure_open()?;
        self.poll()
    }

    /// Read the next message, blocking a live cursor until data arrives.
    ///
    /// Returns `Ok(None)` once a historical cursor is exhausted. A live cursor
    /// only returns through data, an error, or a concurrent close.
    pub fn next(&mut self) -> Result<Option<Arc<Message>>> {
        self.ensure_open()?;
        loop {
            match self.poll()? {
                NextResult::Available(message) => return Ok(Some(message)),
                NextResult::EndOfCursor => return Ok(None),
                NextResult::Pending => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(TickDbError::Closed);
                    }
                    // We hold a sender, so the channel never disconnects.
                    let _ = self.wake_rx.recv();
                    if self.closed.load(Ordering::Acquire) {
                        return Err(TickDbError::Closed);
                    }
                }
            }
        }
    }

    /// Message returned by the last successful read.
    pub fn message(&self) -> Option<&Arc<Message>> {
        self.merge.message()
    }

    /// Key of the stream the current message came from.
    pub fn current_stream_key(&self) -> Option<&str> {
        self.merge.current_stream_key()
    }

    /// Handle that can close this cursor from another thread.
    pub fn closer(&self) -> CursorCloser {
        CursorCloser {
            closed: Arc::clone(&self.closed),
            wake: self.wake_tx.clone(),
        }
    }

    /// Release all sources. Idempotent.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.merge.close();
    }

    /// Reopen the sources at `time`, applying staged stream changes.
    /// `entities` replaces the entity subscription.
    pub fn reset(&mut self, time: Timestamp, entities: Option<&[&str]>) -> Result<()> {
        self.ensure_open()?;
        self.merge.reset(time, entities)
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        self.merge.filter()
    }

    fn filter_mut(&mut self) -> Result<&mut SubscriptionFilter> {
        self.ensure_open()?;
        self.merge.filter_mut()
    }

    // --- Streams: applied on the next reset ---

    pub fn set_streams(&mut self, streams: &[TickStream]) -> Result<()> {
        self.filter_mut()?.set_streams(streams);
        Ok(())
    }

    pub fn add_streams(&mut self, streams: &[TickStream]) -> Result<()> {
        self.filter_mut()?.add_streams(streams);
        Ok(())
    }

    pub fn remove_streams(&mut self, streams: &[TickStream]) -> Result<()> {
        self.filter_mut()?.remove_streams(streams);
        Ok(())
    }

    pub fn remove_all_streams(&mut self) -> Result<()> {
        self.filter_mut()?.remove_all_streams();
        Ok(())
    }

    // --- Types: applied to the next message ---

    pub fn set_types(&mut self, types: &[&str]) -> Result<()> {
        self.filter_mut()?.set_types(types);
        Ok(())
    }

    pub fn add_types(&mut self, types: &[&str]) -> Result<()> {
        self.filter_mut()?.add_types(types);
        Ok(())
    }

    pub fn remove_types(&mut self, types: &[&str]) -> Result<()> {
        self.filter_mut()?.remove_types(types);
        Ok(())
    }

    pub fn subscribe_to_all_types(&mut self) -> Result<()> {
        self.filter_mut()?.subscribe_to_all_types();
        Ok(())
    }

    // --- Entities: applied to the next message ---

    pub fn set_entities(&mut self, symbols: &[&str]) -> Result<()> {
        self.filter_mut()?.set_entities(symbols);
        Ok(())
    }

    pub fn add_entity(&mut self, symbol: &str) -> Result<()> {
        self.filter_mut()?.add_entity(symbol);
        Ok(())
    }

    pub fn add_entities(&mut self, symbols: &[&str]) -> Result<()> {
        self.filter_mut()?.add_entities(symbols);
        Ok(())
    }

    pub fn remove_entity(&mut self, symbol: &str) -> Result<()> {
        self.filter_mut()?.remove_entity(symbol);
        Ok(())
    }

    pub fn remove_entities(&mut self, symbols: &[&str]) -> Result<()> {
        self.filter_mut()?.remove_entities(symbols);
        Ok(())
    }

    pub fn clear_all_entities(&mut self) -> Result<()> {
        self.filter_mut()?.clear_all_entities();
        Ok(())
    }

    pub fn subscribe_to_all_entities(&mut self) -> Result<()> {
        self.filter_mut()?.subscribe_to_all_entities();
        Ok(())
    }

    pub fn add(&mut self, types: &[&str], symbols: &[&str]) -> Result<()> {
        self.filter_mut()?.add(types, symbols);
        Ok(())
    }

    pub fn remove(&mut self, types: &[&str], symbols: &[&str]) -> Result<()> {
        self.filter_mut()?.remove(types, symbols);
        Ok(())
    }

    /// Types and entities added after this call start reading at `time`,
    /// until the next reset.
    pub fn set_time_for_new_subscriptions(&mut self, time: Timestamp) -> Result<()> {
        self.filter_mut()?.set_time_for_new_subscriptions(time);
        Ok(())
    }
}

impl Iterator for TickCursor {
    type Item = Result<Arc<Message>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_closed() {
            return None;
        }
        TickCursor::next(self).transpose()
    }
}

impl Drop for TickCursor {
    fn drop(&mut self) {
        self.close();
    }
}

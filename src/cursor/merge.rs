//! K-way merge over the sources of a cursor.
//!
//! One lane is opened per accepted `(entity, type)` partition of every open
//! stream. Ready lanes sit in a heap ordered by
//! `(timestamp, stream id, entity id, type id, sequence)`, reversed for
//! backwards reads. Lanes without a ready message are parked and re-examined
//! whenever their stream commits.

use super::source::{MessageSource, Peek, SourceOptions};
use crate::error::{Result, TickDbError};
use crate::records::MessageKey;
use crate::stream::TickStream;
use crate::subscriptions::{SubscriptionFilter, WakerId};
use crate::types::{EntityId, Message, SelectionOptions, StreamId, Timestamp, TypeId};
use crossbeam_channel::Sender;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one merge step.
#[derive(Debug)]
pub(crate) enum Step {
    Ready(Arc<Message>),
    /// Some live lane may still produce data.
    Pending,
    /// Every lane is out of range.
    Exhausted,
    /// No stream is open or the filter admits nothing.
    Idle,
}

type OrderKey = (Timestamp, StreamId, EntityId, TypeId, u64);

struct HeapEntry {
    order: OrderKey,
    lane: usize,
    reverse: bool,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap pops the greatest entry, so forward reads invert the order.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.reverse {
            self.order.cmp(&other.order)
        } else {
            other.order.cmp(&self.order)
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LaneState {
    Queued,
    Pending,
    Exhausted,
}

struct Lane {
    stream: usize,
    slot: usize,
    type_name: Arc<str>,
    symbol: Arc<str>,
    entity_id: EntityId,
    type_id: TypeId,
    source: MessageSource,
    state: LaneState,
}

struct OpenStream {
    stream: TickStream,
    waker: Option<WakerId>,
    /// Stream version last synced; `None` forces discovery.
    seen_version: Option<u64>,
    /// Partition slots already considered for lanes.
    known_partitions: usize,
}

pub(crate) struct MergeCursor {
    filter: SubscriptionFilter,
    source_options: SourceOptions,

    streams: Vec<OpenStream>,
    lanes: Vec<Option<Lane>>,
    /// Empty lane slots; none of them has a heap entry.
    free_lanes: Vec<usize>,
    lane_by_partition: HashMap<(usize, usize), usize>,
    /// Source positions of lanes closed by a filter change, so a partition
    /// subscribed again never repeats what it already delivered.
    retired: HashMap<(usize, usize), Bound<MessageKey>>,
    heap: BinaryHeap<HeapEntry>,

    /// Time of the last reset.
    origin: Timestamp,
    /// Furthest timestamp emitted since the reset.
    position: Option<Timestamp>,
    current: Option<(Arc<Message>, usize)>,

    seen_generation: u64,

    /// Registered with every open stream of a live cursor.
    wake: Option<Sender<()>>,

    closed: bool,
}

impl MergeCursor {
    pub fn new(filter: SubscriptionFilter, options: &SelectionOptions, wake: Option<Sender<()>>) -> Self {
        let seen_generation = filter.generation();
        Self {
            filter,
            source_options: SourceOptions::from_selection(options),
            streams: Vec::new(),
            lanes: Vec::new(),
            free_lanes: Vec::new(),
            lane_by_partition: HashMap::new(),
            retired: HashMap::new(),
            heap: BinaryHeap::new(),
            origin: options.start_time(),
            position: None,
            current: None,
            seen_generation,
            wake,
            closed: false,
        }
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> Result<&mut SubscriptionFilter> {
        self.ensure_open()?;
        Ok(&mut self.filter)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TickDbError::InvalidState("Cursor is closed".into()));
        }
        Ok(())
    }

    /// Message produced by the last successful step.
    pub fn message(&self) -> Option<&Arc<Message>> {
        self.current.as_ref().map(|(message, _)| message)
    }

    /// Key of the stream that produced the current message.
    pub fn current_stream_key(&self) -> Option<&str> {
        self.current
            .as_ref()
            .and_then(|(_, stream)| self.streams.get(*stream))
            .map(|open| open.stream.key())
    }

    /// Reopen every source at `time` over the staged stream set.
    ///
    /// `entities` replaces the entity filter; types are left alone. Clears the
    /// new-subscription watermark.
    pub fn reset(&mut self, time: Timestamp, entities: Option<&[&str]>) -> Result<()> {
        self.ensure_open()?;
        if let Some(entities) = entities {
            self.filter.set_entities(entities);
        }
        self.filter.clear_new_subscription_time();

        self.release_streams();
        self.origin = time;
        self.position = None;
        self.current = None;

        for stream in self.filter.streams().to_vec() {
            let waker = self
                .wake
                .as_ref()
                .map(|tx| stream.log().wakers.register(tx.clone()));
            self.streams.push(OpenStream {
                stream,
                waker,
                seen_version: None,
                known_partitions: 0,
            });
        }
        self.seen_generation = self.filter.generation();
        self.sync_streams()?;

        debug!(time = %time, streams = self.streams.len(), lanes = self.lanes.len(), "cursor reset");
        Ok(())
    }

    pub fn step(&mut self) -> Result<Step> {
        self.ensure_open()?;
        for open in &self.streams {
            open.stream.log().ensure_live()?;
        }
        if self.streams.is_empty() || self.filter.is_empty() {
            return Ok(Step::Idle);
        }

        self.sync_streams()?;
        self.sync_filter()?;

        while let Some(entry) = self.heap.pop() {
            let lane = match self.lanes.get_mut(entry.lane).and_then(Option::as_mut) {
                Some(lane) => lane,
                None => continue,
            };
            let message = match lane.source.advance() {
                Some(message) => message,
                None => continue,
            };
            let stream = lane.stream;
            self.enqueue(entry.lane)?;

            self.position = Some(match self.position {
                Some(p) if self.source_options.reverse => p.min(message.timestamp),
                Some(p) => p.max(message.timestamp),
                None => message.timestamp,
            });
            self.current = Some((Arc::clone(&message), stream));
            return Ok(Step::Ready(message));
        }

        // Live lanes never run out, and a live cursor without lanes waits for
        // its first partition.
        let pending = self.source_options.live
            || self
                .lanes
                .iter()
                .flatten()
                .any(|lane| lane.state == LaneState::Pending);
        Ok(if pending { Step::Pending } else { Step::Exhausted })
    }

    /// Release every source and stream. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.release_streams();
        self.current = None;
        self.closed = true;
        debug!("cursor closed");
    }

    fn release_streams(&mut self) {
        for open in self.streams.drain(..) {
            if let Some(id) = open.waker {
                open.stream.log().wakers.unregister(id);
            }
        }
        self.lanes.clear();
        self.free_lanes.clear();
        self.lane_by_partition.clear();
        self.retired.clear();
        self.heap.clear();
    }

    /// Where a lane for a newly subscribed type or entity starts.
    fn resume_time(&self) -> Timestamp {
        self.filter
            .new_subscription_time()
            .or(self.position)
            .unwrap_or(self.origin)
    }

    /// Where a lane for a partition that appeared after the reset starts.
    /// Live cursors read new partitions from the reset time.
    fn discovery_time(&self) -> Timestamp {
        match self.filter.new_subscription_time() {
            Some(time) => time,
            None if self.source_options.live => self.origin,
            None => self.position.unwrap_or(self.origin),
        }
    }

    /// Pick up commits on open streams: new partitions and new data for
    /// parked or cached lanes.
    fn sync_streams(&mut self) -> Result<()> {
        let mut changed = false;

        for stream in 0..self.streams.len() {
            let log = Arc::clone(self.streams[stream].stream.log());
            log.ensure_live()?;

            let version = log.version();
            if self.streams[stream].seen_version == Some(version) {
                continue;
            }
            let first_sync = self.streams[stream].seen_version.is_none();
            self.streams[stream].seen_version = Some(version);
            changed = true;

            if !first_sync {
                for lane in self.lanes.iter_mut().flatten() {
                    if lane.stream == stream {
                        lane.source.refresh()?;
                    }
                }
            }

            let partitions: Vec<(usize, Arc<str>, Arc<str>, EntityId, TypeId)> = {
                let index = log.index.read();
                index
                    .partitions()
                    .iter()
                    .enumerate()
                    .skip(self.streams[stream].known_partitions)
                    .map(|(slot, p)| {
                        (
                            slot,
                            Arc::clone(&p.type_name),
                            Arc::clone(&p.symbol),
                            p.entity_id,
                            p.type_id,
                        )
                    })
                    .collect()
            };

            let start = if first_sync {
                self.origin
            } else {
                self.discovery_time()
            };
            for (slot, type_name, symbol, entity_id, type_id) in partitions {
                self.streams[stream].known_partitions = slot + 1;
                if self.filter.accepts(&type_name, &symbol) {
                    self.open_lane(stream, slot, type_name, symbol, entity_id, type_id, start)?;
                }
            }
        }

        if changed {
            self.rebuild_heap()?;
        }
        Ok(())
    }

    /// Apply type and entity changes made since the last step.
    fn sync_filter(&mut self) -> Result<()> {
        let generation = self.filter.generation();
        if generation == self.seen_generation {
            return Ok(());
        }
        self.seen_generation = generation;

        let mut closed_any = false;
        for index in 0..self.lanes.len() {
            let rejected = match &self.lanes[index] {
                Some(lane) => !self.filter.accepts(&lane.type_name, &lane.symbol),
                None => false,
            };
            if rejected {
                if let Some(lane) = self.lanes[index].take() {
                    let partition = (lane.stream, lane.slot);
                    self.lane_by_partition.remove(&partition);
                    self.retired.insert(partition, lane.source.position());
                    self.free_lanes.push(index);
                }
                closed_any = true;
            }
        }
        if closed_any {
            let lanes = &self.lanes;
            self.heap.retain(|entry| lanes[entry.lane].is_some());
        }

        let start = self.resume_time();
        for stream in 0..self.streams.len() {
            let log = Arc::clone(self.streams[stream].stream.log());
            let known = self.streams[stream].known_partitions;
            let candidates: Vec<(usize, Arc<str>, Arc<str>, EntityId, TypeId)> = {
                let index = log.index.read();
                index
                    .partitions()
                    .iter()
                    .enumerate()
                    .take(known)
                    .filter(|(slot, _)| !self.lane_by_partition.contains_key(&(stream, *slot)))
                    .filter(|(_, p)| self.filter.accepts(&p.type_name, &p.symbol))
                    .map(|(slot, p)| {
                        (
                            slot,
                            Arc::clone(&p.type_name),
                            Arc::clone(&p.symbol),
                            p.entity_id,
                            p.type_id,
                        )
                    })
                    .collect()
            };

            for (slot, type_name, symbol, entity_id, type_id) in candidates {
                let lane = self.open_lane(stream, slot, type_name, symbol, entity_id, type_id, start)?;
                self.enqueue(lane)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn open_lane(
        &mut self,
        stream: usize,
        slot: usize,
        type_name: Arc<str>,
        symbol: Arc<str>,
        entity_id: EntityId,
        type_id: TypeId,
        start: Timestamp,
    ) -> Result<usize> {
        let log = Arc::clone(self.streams[stream].stream.log());
        let mut source = MessageSource::new(log, slot, self.source_options.clone());
        source.seek(start)?;
        if let Some(floor) = self.retired.remove(&(stream, slot)) {
            source.resume_from(floor);
        }

        let lane = Some(Lane {
            stream,
            slot,
            type_name,
            symbol,
            entity_id,
            type_id,
            source,
            state: LaneState::Pending,
        });
        let index = match self.free_lanes.pop() {
            Some(index) => {
                self.lanes[index] = lane;
                index
            }
            None => {
                self.lanes.push(lane);
                self.lanes.len() - 1
            }
        };
        self.lane_by_partition.insert((stream, slot), index);
        Ok(index)
    }

    /// Peek a lane and queue it if it has a message.
    fn enqueue(&mut self, index: usize) -> Result<()> {
        let reverse = self.source_options.reverse;
        let stream_id = match self.lanes.get(index).and_then(Option::as_ref) {
            Some(lane) => self.streams[lane.stream].stream.id(),
            None => return Ok(()),
        };
        let lane = match self.lanes.get_mut(index).and_then(Option::as_mut) {
            Some(lane) => lane,
            None => return Ok(()),
        };

        match lane.source.peek()? {
            Peek::Ready(key) => {
                lane.state = LaneState::Queued;
                self.heap.push(HeapEntry {
                    order: order_key(key, stream_id, lane.entity_id, lane.type_id),
                    lane: index,
                    reverse,
                });
            }
            Peek::Pending => lane.state = LaneState::Pending,
            Peek::Exhausted => lane.state = LaneState::Exhausted,
        }
        Ok(())
    }

    fn rebuild_heap(&mut self) -> Result<()> {
        self.heap.clear();
        for index in 0..self.lanes.len() {
            self.enqueue(index)?;
        }
        Ok(())
    }
}

fn order_key(key: MessageKey, stream: StreamId, entity: EntityId, type_id: TypeId) -> OrderKey {
    (key.0, stream, entity, type_id, key.1)
}

impl Drop for MergeCursor {
    fn drop(&mut self) {
        self.close();
    }
}

//! Per-partition message supplier.
//!
//! A `MessageSource` reads one `(entity, type)` partition of one stream in
//! time order. It keeps its position as a key bound, so data appended to the
//! partition never invalidates it. Live sources also pick up messages that
//! were committed behind their position after they were opened.

use crate::error::{Result, TickDbError};
use crate::records::{space_of, MessageIndex, MessageKey, Partition};
use crate::stream::StreamLog;
use crate::types::{Message, SelectionOptions, Timestamp};
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

/// What a source has to offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Peek {
    Ready(MessageKey),
    /// Live source at the end of committed data.
    Pending,
    /// Bounded source with nothing left in range.
    Exhausted,
}

/// Read settings shared by every source of a cursor.
#[derive(Debug, Clone)]
pub(crate) struct SourceOptions {
    pub reverse: bool,
    pub live: bool,
    /// Inclusive bound in iteration direction.
    pub limit: Option<Timestamp>,
    pub space: Option<String>,
}

impl SourceOptions {
    pub fn from_selection(options: &SelectionOptions) -> Self {
        let live = options.is_live();
        let limit = if options.reverse {
            options.from
        } else if live {
            None
        } else {
            options.to
        };

        Self {
            reverse: options.reverse,
            live,
            limit,
            space: options.space.clone(),
        }
    }
}

struct Head {
    message: Arc<Message>,
    /// Delivered from the late queue; does not move the position.
    late: bool,
}

pub(crate) struct MessageSource {
    log: Arc<StreamLog>,
    slot: usize,
    options: SourceOptions,

    /// Time of the last seek. Late data before it is ignored.
    start: Timestamp,

    /// Next read starts here, in iteration direction.
    position: Bound<MessageKey>,

    /// Commit mark already accounted for.
    seen_commits: u64,

    /// Keys committed behind the position, waiting for delivery.
    late: VecDeque<MessageKey>,

    head: Option<Head>,
}

fn key_of(message: &Message) -> MessageKey {
    (message.timestamp, message.sequence)
}

fn bound_key(bound: Bound<MessageKey>) -> (MessageKey, bool) {
    match bound {
        Bound::Included(key) => (key, false),
        Bound::Excluded(key) => (key, true),
        Bound::Unbounded => ((Timestamp::MIN, 0), false),
    }
}

impl MessageSource {
    pub fn new(log: Arc<StreamLog>, slot: usize, options: SourceOptions) -> Self {
        Self {
            log,
            slot,
            options,
            start: Timestamp::MIN,
            position: Bound::Unbounded,
            seen_commits: 0,
            late: VecDeque::new(),
            head: None,
        }
    }

    /// Reposition to the first message at or after `time` (at or before,
    /// when reversed).
    pub fn seek(&mut self, time: Timestamp) -> Result<()> {
        self.start = time;
        self.position = if self.options.reverse {
            Bound::Included((time, u64::MAX))
        } else {
            Bound::Included((time, 0))
        };
        self.head = None;
        self.late.clear();

        let log = Arc::clone(&self.log);
        let index = log.index.read();
        self.seen_commits = self.partition(&index)?.commit_mark();
        Ok(())
    }

    /// Where the next read starts.
    pub fn position(&self) -> Bound<MessageKey> {
        self.position
    }

    /// Never read anything `floor` has already passed. Used after a seek
    /// when the partition was read earlier by this cursor.
    pub fn resume_from(&mut self, floor: Bound<MessageKey>) {
        if self.is_ahead(floor, self.position) {
            self.position = floor;
            self.head = None;
        }
    }

    /// Account for commits made since the last look and drop a cached head
    /// that was truncated away.
    pub fn refresh(&mut self) -> Result<()> {
        let log = Arc::clone(&self.log);
        let index = log.index.read();
        let partition = self.partition(&index)?;
        self.absorb(partition);

        if let Some(head) = &self.head {
            if partition.get(&key_of(&head.message)).is_none() {
                self.head = None;
            }
        }
        Ok(())
    }

    /// Classify commits made since the last look.
    ///
    /// Commits behind the position become late data for live sources. A commit
    /// that sorts before the cached head invalidates it. Must run under the
    /// same index lock as any scan that follows, so scanned keys are never
    /// queued again as late data.
    fn absorb(&mut self, partition: &Partition) {
        for &key in partition.commits_since(self.seen_commits) {
            if self.is_behind(key) {
                if self.options.live && key.0 >= self.start {
                    self.late.push_back(key);
                }
            } else if let Some(head) = &self.head {
                if !head.late && self.precedes(key, key_of(&head.message)) {
                    self.head = None;
                }
            }
        }
        self.seen_commits = partition.commit_mark();
    }

    pub fn peek(&mut self) -> Result<Peek> {
        if let Some(head) = &self.head {
            return Ok(Peek::Ready(key_of(&head.message)));
        }

        self.log.ensure_live()?;
        let log = Arc::clone(&self.log);
        let index = log.index.read();
        let partition = self.partition(&index)?;
        self.absorb(partition);

        while let Some(key) = self.late.pop_front() {
            if let Some(message) = partition.get(&key) {
                if self.in_space(message) {
                    self.head = Some(Head {
                        message: Arc::clone(message),
                        late: true,
                    });
                    return Ok(Peek::Ready(key));
                }
            }
        }

        for message in partition.scan(self.position, self.options.reverse) {
            if self.beyond_limit(message.timestamp) {
                return Ok(Peek::Exhausted);
            }
            if !self.in_space(message) {
                self.position = Bound::Excluded(key_of(message));
                continue;
            }
            self.head = Some(Head {
                message: Arc::clone(message),
                late: false,
            });
            return Ok(Peek::Ready(key_of(message)));
        }

        Ok(if self.options.live {
            Peek::Pending
        } else {
            Peek::Exhausted
        })
    }

    /// Take the peeked message and move past it.
    pub fn advance(&mut self) -> Option<Arc<Message>> {
        let head = self.head.take()?;
        if !head.late {
            self.position = Bound::Excluded(key_of(&head.message));
        }
        Some(head.message)
    }

    fn partition<'a>(&self, index: &'a MessageIndex) -> Result<&'a Partition> {
        index.partition(self.slot).ok_or_else(|| {
            TickDbError::Corruption(format!(
                "partition {} missing from stream '{}'",
                self.slot,
                self.log.key()
            ))
        })
    }

    fn in_space(&self, message: &Message) -> bool {
        match &self.options.space {
            Some(space) => space_of(message) == space,
            None => true,
        }
    }

    fn beyond_limit(&self, time: Timestamp) -> bool {
        match self.options.limit {
            Some(limit) if self.options.reverse => time < limit,
            Some(limit) => time > limit,
            None => false,
        }
    }

    /// Whether `a` comes before `b` in iteration order.
    fn precedes(&self, a: MessageKey, b: MessageKey) -> bool {
        if self.options.reverse {
            a > b
        } else {
            a < b
        }
    }

    /// Whether bound `a` lies strictly past bound `b` in iteration direction.
    fn is_ahead(&self, a: Bound<MessageKey>, b: Bound<MessageKey>) -> bool {
        match (a, b) {
            (Bound::Unbounded, _) => false,
            (_, Bound::Unbounded) => true,
            (a, b) => {
                let (ka, a_excluded) = bound_key(a);
                let (kb, b_excluded) = bound_key(b);
                if ka == kb {
                    a_excluded && !b_excluded
                } else {
                    self.precedes(kb, ka)
                }
            }
        }
    }

    /// Whether `key` lies behind the current position.
    fn is_behind(&self, key: MessageKey) -> bool {
        match self.position {
            Bound::Unbounded => false,
            Bound::Included(p) => self.precedes(key, p),
            Bound::Excluded(p) => key == p || self.precedes(key, p),
        }
    }
}

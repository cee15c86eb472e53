//! In-memory message index for one stream.
//!
//! Messages are partitioned by `(entity, type)`. Each partition keeps its
//! messages ordered by `(timestamp, sequence)` plus the keys in commit order,
//! which lets live readers find data that was flushed behind their position.
//! Partitions are never removed, so a partition slot stays valid for the
//! lifetime of the stream even after truncation or clearing.

use crate::types::{EntityId, Message, Timestamp, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Order of messages inside a partition.
pub type MessageKey = (Timestamp, u64);

/// Name of the default space in listings.
pub const DEFAULT_SPACE: &str = "";

/// Messages of one entity and one type.
pub struct Partition {
    pub entity_id: EntityId,
    pub type_id: TypeId,
    pub symbol: Arc<str>,
    pub type_name: Arc<str>,

    messages: BTreeMap<MessageKey, Arc<Message>>,

    /// Keys of stored messages in commit (sequence) order.
    commits: Vec<MessageKey>,

    /// Sequence after the last commit.
    commit_mark: u64,
}

impl Partition {
    fn new(message: &Message) -> Self {
        Self {
            entity_id: message.entity_id,
            type_id: message.type_id,
            symbol: Arc::clone(&message.symbol),
            type_name: Arc::clone(&message.type_name),
            messages: BTreeMap::new(),
            commits: Vec::new(),
            commit_mark: 0,
        }
    }

    /// Messages from `bound` onwards, in iteration direction.
    pub fn scan(
        &self,
        bound: Bound<MessageKey>,
        reverse: bool,
    ) -> Box<dyn Iterator<Item = &Arc<Message>> + '_> {
        if reverse {
            Box::new(self.messages.range((Bound::Unbounded, bound)).rev().map(|(_, m)| m))
        } else {
            Box::new(self.messages.range((bound, Bound::Unbounded)).map(|(_, m)| m))
        }
    }

    pub fn get(&self, key: &MessageKey) -> Option<&Arc<Message>> {
        self.messages.get(key)
    }

    /// Marks how far commits have been made; pass it back to
    /// `commits_since`.
    pub fn commit_mark(&self) -> u64 {
        self.commit_mark
    }

    /// Keys of stored messages committed at or after `mark`.
    pub fn commits_since(&self, mark: u64) -> &[MessageKey] {
        let start = self.commits.partition_point(|key| key.1 < mark);
        &self.commits[start..]
    }

    /// Drop commit keys of messages that are gone.
    fn prune_commits(&mut self) {
        let messages = &self.messages;
        self.commits.retain(|key| messages.contains_key(key));
    }

    pub fn first_time(&self) -> Option<Timestamp> {
        self.messages.keys().next().map(|(t, _)| *t)
    }

    pub fn last_time(&self) -> Option<Timestamp> {
        self.messages.keys().next_back().map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// All committed messages of a stream.
#[derive(Default)]
pub struct MessageIndex {
    partitions: Vec<Partition>,

    /// (entity, type) -> partition slot.
    slots: HashMap<(EntityId, TypeId), usize>,

    /// Next commit sequence to assign.
    next_sequence: u64,

    len: usize,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit one message, assigning its sequence.
    pub fn insert(&mut self, mut message: Message) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        message.sequence = sequence;

        let slot = match self.slots.get(&(message.entity_id, message.type_id)) {
            Some(&slot) => slot,
            None => {
                let slot = self.partitions.len();
                self.partitions.push(Partition::new(&message));
                self.slots.insert((message.entity_id, message.type_id), slot);
                slot
            }
        };

        let key = (message.timestamp, sequence);
        let partition = &mut self.partitions[slot];
        partition.messages.insert(key, Arc::new(message));
        partition.commits.push(key);
        partition.commit_mark = sequence + 1;
        self.len += 1;

        sequence
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, slot: usize) -> Option<&Partition> {
        self.partitions.get(slot)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First and last timestamp, optionally restricted to some entities.
    pub fn time_range(&self, entities: Option<&[EntityId]>) -> Option<(Timestamp, Timestamp)> {
        let mut range: Option<(Timestamp, Timestamp)> = None;
        for partition in self.matching(entities) {
            if let (Some(first), Some(last)) = (partition.first_time(), partition.last_time()) {
                range = Some(match range {
                    None => (first, last),
                    Some((lo, hi)) => (lo.min(first), hi.max(last)),
                });
            }
        }
        range
    }

    /// First and last timestamp of messages in one space.
    pub fn space_time_range(&self, space: &str) -> Option<(Timestamp, Timestamp)> {
        let mut range: Option<(Timestamp, Timestamp)> = None;
        for message in self.messages().filter(|m| space_of(m) == space) {
            let t = message.timestamp;
            range = Some(match range {
                None => (t, t),
                Some((lo, hi)) => (lo.min(t), hi.max(t)),
            });
        }
        range
    }

    /// Remove messages at or after `time`. Returns how many were removed.
    pub fn truncate(&mut self, time: Timestamp, entities: Option<&[EntityId]>) -> usize {
        let mut removed = 0;
        for partition in self.matching_mut(entities) {
            let tail = partition.messages.split_off(&(time, 0));
            removed += tail.len();
            partition.prune_commits();
        }
        self.len -= removed;
        removed
    }

    /// Remove messages before `time`. Returns how many were removed.
    pub fn purge(&mut self, time: Timestamp) -> usize {
        let mut removed = 0;
        for partition in &mut self.partitions {
            let kept = partition.messages.split_off(&(time, 0));
            removed += partition.messages.len();
            partition.messages = kept;
            partition.prune_commits();
        }
        self.len -= removed;
        removed
    }

    /// Remove every message. Returns how many were removed.
    pub fn clear(&mut self, entities: Option<&[EntityId]>) -> usize {
        let mut removed = 0;
        for partition in self.matching_mut(entities) {
            removed += partition.messages.len();
            partition.messages.clear();
            partition.commits.clear();
        }
        self.len -= removed;
        removed
    }

    /// Entities that currently have data.
    pub fn entities(&self) -> Vec<EntityId> {
        let set: BTreeSet<EntityId> = self
            .partitions
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.entity_id)
            .collect();
        set.into_iter().collect()
    }

    /// Spaces that currently hold data.
    pub fn spaces(&self) -> BTreeSet<String> {
        self.messages().map(|m| space_of(m).to_string()).collect()
    }

    /// Move every message of space `from` to space `to`.
    pub fn rename_space(&mut self, from: &str, to: &str) -> usize {
        let target: Option<Arc<str>> = if to == DEFAULT_SPACE {
            None
        } else {
            Some(Arc::from(to))
        };

        let mut renamed = 0;
        for partition in &mut self.partitions {
            for message in partition.messages.values_mut() {
                if space_of(message) == from {
                    let mut moved = Message::clone(message);
                    moved.space = target.clone();
                    *message = Arc::new(moved);
                    renamed += 1;
                }
            }
        }
        renamed
    }

    /// Remove every message stored in the given spaces.
    pub fn delete_spaces(&mut self, spaces: &[String]) -> usize {
        let mut removed = 0;
        for partition in &mut self.partitions {
            let before = partition.messages.len();
            partition
                .messages
                .retain(|_, m| !spaces.iter().any(|s| s == space_of(m)));
            removed += before - partition.messages.len();
            partition.prune_commits();
        }
        self.len -= removed;
        removed
    }

    fn messages(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.partitions.iter().flat_map(|p| p.messages.values())
    }

    fn matching<'a>(&'a self, entities: Option<&'a [EntityId]>) -> impl Iterator<Item = &'a Partition> {
        self.partitions
            .iter()
            .filter(move |p| entities.map_or(true, |e| e.contains(&p.entity_id)))
    }

    fn matching_mut<'a>(
        &'a mut self,
        entities: Option<&'a [EntityId]>,
    ) -> impl Iterator<Item = &'a mut Partition> {
        self.partitions
            .iter_mut()
            .filter(move |p| entities.map_or(true, |e| e.contains(&p.entity_id)))
    }
}

/// Space name of a message, with the default space as `""`.
pub fn space_of(message: &Message) -> &str {
    message.space.as_deref().unwrap_or(DEFAULT_SPACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ts: i64, entity: u32, symbol: &str, space: Option<&str>) -> Message {
        Message {
            timestamp: Timestamp(ts),
            type_id: TypeId(0),
            type_name: Arc::from("bar"),
            entity_id: EntityId(entity),
            symbol: Arc::from(symbol),
            space: space.map(Arc::from),
            sequence: 0,
            fields: Vec::new(),
        }
    }

    fn sample() -> MessageIndex {
        let mut index = MessageIndex::new();
        for i in 0..10 {
            let entity = (i % 2) as u32;
            let symbol = if entity == 0 { "AAPL" } else { "IBM" };
            index.insert(message(i * 10, entity, symbol, None));
        }
        index
    }

    #[test]
    fn test_insert_partitions_and_sequences() {
        let index = sample();
        assert_eq!(index.len(), 10);
        assert_eq!(index.partitions().len(), 2);

        let aapl = index.partition(0).unwrap();
        assert_eq!(&*aapl.symbol, "AAPL");
        assert_eq!(aapl.len(), 5);
        assert_eq!(aapl.commits_since(0).len(), 5);
        assert_eq!(aapl.commit_mark(), 9);

        let sequences: Vec<u64> = aapl.scan(Bound::Unbounded, false).map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_scan_directions() {
        let index = sample();
        let ibm = index.partition(1).unwrap();

        let forward: Vec<i64> = ibm
            .scan(Bound::Included((Timestamp(30), 0)), false)
            .map(|m| m.timestamp.0)
            .collect();
        assert_eq!(forward, vec![30, 50, 70, 90]);

        let backward: Vec<i64> = ibm
            .scan(Bound::Included((Timestamp(50), u64::MAX)), true)
            .map(|m| m.timestamp.0)
            .collect();
        assert_eq!(backward, vec![50, 30, 10]);
    }

    #[test]
    fn test_time_range_and_truncate() {
        let mut index = sample();
        assert_eq!(index.time_range(None), Some((Timestamp(0), Timestamp(90))));

        let removed = index.truncate(Timestamp(50), Some(&[EntityId(1)]));
        assert_eq!(removed, 3);
        assert_eq!(
            index.time_range(Some(&[EntityId(1)])),
            Some((Timestamp(10), Timestamp(30)))
        );
        assert_eq!(index.time_range(None), Some((Timestamp(0), Timestamp(80))));

        assert_eq!(index.purge(Timestamp(20)), 2);
        assert_eq!(index.time_range(None), Some((Timestamp(20), Timestamp(80))));

        index.clear(None);
        assert!(index.is_empty());
        assert_eq!(index.time_range(None), None);
        assert!(index.entities().is_empty());
        // Slots survive clearing.
        assert_eq!(index.partitions().len(), 2);
    }

    #[test]
    fn test_spaces() {
        let mut index = MessageIndex::new();
        index.insert(message(0, 0, "A", None));
        index.insert(message(1, 0, "A", Some("x")));
        index.insert(message(2, 0, "A", Some("x")));
        index.insert(message(3, 0, "A", Some("y")));

        let spaces: Vec<String> = index.spaces().into_iter().collect();
        assert_eq!(spaces, vec!["", "x", "y"]);
        assert_eq!(index.space_time_range("x"), Some((Timestamp(1), Timestamp(2))));

        assert_eq!(index.rename_space("x", "z"), 2);
        assert!(index.spaces().contains("z"));
        assert!(!index.spaces().contains("x"));

        assert_eq!(index.delete_spaces(&["z".to_string(), "y".to_string()]), 3);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_maintenance_prunes_commits() {
        let mut index = sample();
        let mark = index.partition(0).unwrap().commit_mark();

        index.truncate(Timestamp(60), None);
        index.purge(Timestamp(20));
        let aapl = index.partition(0).unwrap();
        let keys: Vec<i64> = aapl.commits_since(0).iter().map(|k| k.0 .0).collect();
        assert_eq!(keys, vec![20, 40]);
        assert!(aapl.commits_since(mark).is_empty());

        // New commits are still found from an old mark.
        index.insert(message(100, 0, "AAPL", Some("x")));
        let aapl = index.partition(0).unwrap();
        assert_eq!(aapl.commits_since(mark), &[(Timestamp(100), 10)]);

        index.delete_spaces(&["x".to_string()]);
        assert_eq!(index.partition(0).unwrap().commits_since(0).len(), 2);

        index.clear(None);
        assert!(index.partition(0).unwrap().commits_since(0).is_empty());
        assert!(index.partition(1).unwrap().commits_since(0).is_empty());
    }
}

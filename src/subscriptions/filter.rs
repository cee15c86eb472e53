//! Cursor subscription filter.
//!
//! Types and entities are matched by name, so one filter applies across
//! streams whose registries assigned different ids. Type and entity changes
//! take effect on the next message; the stream set is staged here and only
//! picked up by the cursor on `reset`.

use crate::stream::TickStream;
use crate::types::Timestamp;
use std::collections::HashSet;

/// A set of names that may be unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    All,
    AllExcept(HashSet<String>),
    Only(HashSet<String>),
}

impl Selection {
    /// `None` selects everything, a slice selects exactly those names.
    pub fn from_names(names: Option<&[&str]>) -> Self {
        match names {
            None => Selection::All,
            Some(names) => Selection::Only(to_set(names)),
        }
    }

    pub fn accepts(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::AllExcept(excluded) => !excluded.contains(name),
            Selection::Only(included) => included.contains(name),
        }
    }

    /// Whether no name can pass.
    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Only(included) if included.is_empty())
    }

    fn add(&mut self, names: &[&str]) {
        match self {
            Selection::All => {}
            Selection::AllExcept(excluded) => {
                for name in names {
                    excluded.remove(*name);
                }
                if excluded.is_empty() {
                    *self = Selection::All;
                }
            }
            Selection::Only(included) => {
                included.extend(names.iter().map(|n| n.to_string()));
            }
        }
    }

    fn remove(&mut self, names: &[&str]) {
        match self {
            Selection::All => *self = Selection::AllExcept(to_set(names)),
            Selection::AllExcept(excluded) => {
                excluded.extend(names.iter().map(|n| n.to_string()));
            }
            Selection::Only(included) => {
                for name in names {
                    included.remove(*name);
                }
            }
        }
    }
}

fn to_set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Streams, types and entities a cursor is subscribed to.
pub struct SubscriptionFilter {
    /// Applied by the cursor on its next reset.
    streams: Vec<TickStream>,

    types: Selection,
    entities: Selection,

    /// Where newly added types and entities start reading.
    new_subscription_time: Option<Timestamp>,

    /// Bumped by every mutation.
    generation: u64,
}

impl SubscriptionFilter {
    pub fn new(streams: Vec<TickStream>, types: Selection, entities: Selection) -> Self {
        let mut filter = Self {
            streams: Vec::new(),
            types,
            entities,
            new_subscription_time: None,
            generation: 0,
        };
        filter.set_streams(&streams);
        filter
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    // --- Streams (staged until reset) ---

    pub fn streams(&self) -> &[TickStream] {
        &self.streams
    }

    pub fn set_streams(&mut self, streams: &[TickStream]) {
        self.streams.clear();
        self.add_streams(streams);
    }

    pub fn add_streams(&mut self, streams: &[TickStream]) {
        for stream in streams {
            if !self.streams.contains(stream) {
                self.streams.push(stream.clone());
            }
        }
        self.touch();
    }

    pub fn remove_streams(&mut self, streams: &[TickStream]) {
        self.streams.retain(|s| !streams.contains(s));
        self.touch();
    }

    pub fn remove_all_streams(&mut self) {
        self.streams.clear();
        self.touch();
    }

    // --- Types ---

    pub fn types(&self) -> &Selection {
        &self.types
    }

    pub fn set_types(&mut self, types: &[&str]) {
        self.types = Selection::Only(to_set(types));
        self.touch();
    }

    pub fn add_types(&mut self, types: &[&str]) {
        self.types.add(types);
        self.touch();
    }

    pub fn remove_types(&mut self, types: &[&str]) {
        self.types.remove(types);
        self.touch();
    }

    pub fn subscribe_to_all_types(&mut self) {
        self.types = Selection::All;
        self.touch();
    }

    // --- Entities ---

    pub fn entities(&self) -> &Selection {
        &self.entities
    }

    pub fn set_entities(&mut self, symbols: &[&str]) {
        self.entities = Selection::Only(to_set(symbols));
        self.touch();
    }

    pub fn add_entity(&mut self, symbol: &str) {
        self.add_entities(&[symbol]);
    }

    pub fn add_entities(&mut self, symbols: &[&str]) {
        self.entities.add(symbols);
        self.touch();
    }

    pub fn remove_entity(&mut self, symbol: &str) {
        self.remove_entities(&[symbol]);
    }

    pub fn remove_entities(&mut self, symbols: &[&str]) {
        self.entities.remove(symbols);
        self.touch();
    }

    pub fn clear_all_entities(&mut self) {
        self.entities = Selection::Only(HashSet::new());
        self.touch();
    }

    pub fn subscribe_to_all_entities(&mut self) {
        self.entities = Selection::All;
        self.touch();
    }

    // --- Combined ---

    pub fn add(&mut self, types: &[&str], symbols: &[&str]) {
        self.types.add(types);
        self.entities.add(symbols);
        self.touch();
    }

    pub fn remove(&mut self, types: &[&str], symbols: &[&str]) {
        self.types.remove(types);
        self.entities.remove(symbols);
        self.touch();
    }

    // --- New-subscription watermark ---

    /// Types and entities added from now on start reading at `time`.
    pub fn set_time_for_new_subscriptions(&mut self, time: Timestamp) {
        self.new_subscription_time = Some(time);
        self.touch();
    }

    pub fn new_subscription_time(&self) -> Option<Timestamp> {
        self.new_subscription_time
    }

    pub(crate) fn clear_new_subscription_time(&mut self) {
        self.new_subscription_time = None;
    }

    // --- Matching ---

    pub fn accepts(&self, type_name: &str, symbol: &str) -> bool {
        self.types.accepts(type_name) && self.entities.accepts(symbol)
    }

    /// Whether no type or no entity can pass.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() || self.entities.is_empty()
    }
}

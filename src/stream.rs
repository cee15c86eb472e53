//! Streams: the shared per-stream log and the public `TickStream` handle.
//!
//! A `StreamLog` owns everything cursors and loaders of one stream share: the
//! committed message index, the type and entity registries, the optional
//! stream file and the wakers of live cursors. All synchronization between
//! readers and writers goes through it.

use crate::cursor::TickCursor;
use crate::error::{Result, TickDbError};
use crate::loader::TickLoader;
use crate::records::{LogEntry, LoggedMessage, MessageIndex, StreamFile};
use crate::registry::{EntityRegistry, TypeRegistry};
use crate::subscriptions::{Selection, WakeManager};
use crate::types::{
    EntityId, LoadingOptions, Message, SelectionOptions, StreamId, StreamOptions, Timestamp,
    TypeDescriptor, TypeId,
};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by every handle, cursor and loader of one stream.
pub(crate) struct StreamLog {
    id: StreamId,
    key: String,
    options: StreamOptions,

    pub(crate) index: RwLock<MessageIndex>,
    pub(crate) types: TypeRegistry,
    pub(crate) entities: EntityRegistry,
    pub(crate) wakers: WakeManager,

    /// Durable order; `None` for in-memory databases.
    file: Option<StreamFile>,

    /// Serializes writers so file order equals commit order.
    commit_lock: Mutex<()>,

    /// Bumped after every change to the index.
    version: AtomicU64,

    deleted: AtomicBool,
}

impl StreamLog {
    pub(crate) fn new(
        id: StreamId,
        key: String,
        options: StreamOptions,
        file: Option<StreamFile>,
    ) -> Self {
        Self {
            id,
            key,
            options,
            index: RwLock::new(MessageIndex::new()),
            types: TypeRegistry::new(),
            entities: EntityRegistry::new(),
            wakers: WakeManager::new(),
            file,
            commit_lock: Mutex::new(()),
            version: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
        }
    }

    /// Rebuild a stream from the entries of its file.
    pub(crate) fn restore(file: StreamFile, entries: Vec<LogEntry>) -> Result<Self> {
        let mut entries = entries.into_iter();
        let (id, key, options) = match entries.next() {
            Some(LogEntry::Created { id, key, options }) => (id, key, options),
            _ => {
                return Err(TickDbError::Corruption(format!(
                    "{}: stream file does not start with a creation entry",
                    file.path().display()
                )))
            }
        };

        let log = Self::new(id, key, options, Some(file));
        let mut replayed = 0usize;
        for entry in entries {
            log.apply(entry)?;
            replayed += 1;
        }

        debug!(key = %log.key, entries = replayed, messages = log.index.read().len(), "restored stream");
        Ok(log)
    }

    fn apply(&self, entry: LogEntry) -> Result<()> {
        match entry {
            LogEntry::Created { key, .. } => {
                return Err(TickDbError::Corruption(format!(
                    "duplicate creation entry for stream '{}'",
                    key
                )))
            }
            LogEntry::TypeRegistered { id, descriptor } => self.types.restore(id, descriptor)?,
            LogEntry::EntityRegistered { id, symbol } => self.entities.restore(id, &symbol)?,
            LogEntry::Batch { messages } => {
                let resolved = messages
                    .into_iter()
                    .map(|m| self.resolve(m))
                    .collect::<Result<Vec<_>>>()?;
                let mut index = self.index.write();
                for message in resolved {
                    index.insert(message);
                }
            }
            LogEntry::Truncated { time, entities } => {
                self.index.write().truncate(time, entities.as_deref());
            }
            LogEntry::Cleared { entities } => {
                self.index.write().clear(entities.as_deref());
            }
            LogEntry::Purged { time } => {
                self.index.write().purge(time);
            }
            LogEntry::SpaceRenamed { from, to } => {
                self.index.write().rename_space(&from, &to);
            }
            LogEntry::SpacesDeleted { spaces } => {
                self.index.write().delete_spaces(&spaces);
            }
        }
        Ok(())
    }

    /// Turn a stored message back into a `Message` using the registries.
    fn resolve(&self, stored: LoggedMessage) -> Result<Message> {
        let (type_name, _) = self.types.get(stored.type_id).ok_or_else(|| {
            TickDbError::Corruption(format!("unknown type id {} in '{}'", stored.type_id.0, self.key))
        })?;
        let symbol = self.entities.symbol(stored.entity_id).ok_or_else(|| {
            TickDbError::Corruption(format!(
                "unknown entity id {} in '{}'",
                stored.entity_id.0, self.key
            ))
        })?;

        Ok(Message {
            timestamp: stored.timestamp,
            type_id: stored.type_id,
            type_name,
            entity_id: stored.entity_id,
            symbol,
            space: stored.space.map(Arc::from),
            sequence: 0,
            fields: stored.fields,
        })
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(TickDbError::StreamNotFound(self.key.clone()));
        }
        Ok(())
    }

    /// Mark the stream deleted and wake its live cursors so they notice.
    pub(crate) fn mark_deleted(&self) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.deleted.store(true, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
        self.wakers.notify_all();
        if let Some(file) = &self.file {
            file.remove()?;
        }
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync()?;
        }
        Ok(())
    }

    fn persist(&self, entry: &LogEntry) -> Result<()> {
        if let Some(file) = &self.file {
            file.append(entry)?;
        }
        Ok(())
    }

    /// Register a type name, resolving its descriptor against the schema.
    pub(crate) fn register_type(&self, name: &str) -> Result<(TypeId, Arc<TypeDescriptor>)> {
        self.ensure_live()?;
        let (id, descriptor, created) = self.types.register(name, |id, name| {
            let descriptor = match self.options.schema.iter().find(|d| d.name == name) {
                Some(descriptor) => descriptor.clone(),
                None if self.options.polymorphic => TypeDescriptor::open(name),
                None => {
                    return Err(TickDbError::SchemaViolation(format!(
                        "Type '{}' is not defined by stream '{}'",
                        name, self.key
                    )))
                }
            };
            self.persist(&LogEntry::TypeRegistered {
                id,
                descriptor: descriptor.clone(),
            })?;
            Ok(Arc::new(descriptor))
        })?;

        if created {
            debug!(stream = %self.key, type_name = name, id = id.0, "registered type");
        }
        Ok((id, descriptor))
    }

    /// Register an entity symbol.
    pub(crate) fn register_entity(&self, symbol: &str) -> Result<EntityId> {
        self.ensure_live()?;
        if symbol.is_empty() {
            return Err(TickDbError::InvalidOperation(
                "Entity symbol must not be empty".into(),
            ));
        }

        let (id, _) = self.entities.register(symbol, |id, symbol| {
            self.persist(&LogEntry::EntityRegistered {
                id,
                symbol: symbol.to_string(),
            })
        })?;
        Ok(id)
    }

    /// Make a batch durable and visible, then wake live cursors.
    pub(crate) fn commit(&self, batch: &[Message]) -> Result<usize> {
        self.ensure_live()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let _guard = self.commit_lock.lock();
        self.ensure_live()?;

        self.persist(&LogEntry::Batch {
            messages: batch.iter().map(LoggedMessage::from).collect(),
        })?;

        {
            let mut index = self.index.write();
            for message in batch {
                index.insert(message.clone());
            }
        }

        self.publish();
        Ok(batch.len())
    }

    /// Persist and apply a maintenance entry.
    fn maintain(&self, entry: LogEntry) -> Result<()> {
        self.ensure_live()?;
        let _guard = self.commit_lock.lock();
        self.persist(&entry)?;
        self.apply(entry)?;
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.wakers.notify_all();
    }

    /// Entity ids for symbols; unknown symbols are an error.
    fn entity_ids(&self, symbols: &[&str]) -> Result<Vec<EntityId>> {
        symbols
            .iter()
            .map(|s| {
                self.entities
                    .id_of(s)
                    .ok_or_else(|| TickDbError::EntityNotFound(s.to_string()))
            })
            .collect()
    }
}

impl From<&Message> for LoggedMessage {
    fn from(message: &Message) -> Self {
        LoggedMessage {
            timestamp: message.timestamp,
            type_id: message.type_id,
            entity_id: message.entity_id,
            space: message.space.as_deref().map(str::to_string),
            fields: message.fields.clone(),
        }
    }
}

/// Handle on one stream of a database. Cheap to clone.
#[derive(Clone)]
pub struct TickStream {
    log: Arc<StreamLog>,
}

impl TickStream {
    pub(crate) fn from_log(log: Arc<StreamLog>) -> Self {
        Self { log }
    }

    pub(crate) fn log(&self) -> &Arc<StreamLog> {
        &self.log
    }

    pub fn key(&self) -> &str {
        self.log.key()
    }

    pub fn id(&self) -> StreamId {
        self.log.id()
    }

    pub fn options(&self) -> &StreamOptions {
        &self.log.options
    }

    /// Whether the stream has been deleted from its database.
    pub fn is_deleted(&self) -> bool {
        self.log.is_deleted()
    }

    /// Metadata as pretty-printed JSON.
    pub fn describe(&self) -> Result<String> {
        self.log.ensure_live()?;
        let options = &self.log.options;
        let registered: Vec<String> = self.log.types.names().iter().map(|n| n.to_string()).collect();
        let range = self.time_range()?;

        let doc = json!({
            "key": self.key(),
            "name": options.name,
            "description": options.description,
            "polymorphic": options.polymorphic,
            "schema": options.schema,
            "registeredTypes": registered,
            "entities": self.log.entities.len(),
            "messages": self.message_count(),
            "timeRange": range.map(|(from, to)| [from.0, to.0]),
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Cursor over this stream subscribed to every type and entity, positioned
    /// at the start of the selection.
    pub fn create_cursor(&self, options: SelectionOptions) -> Result<TickCursor> {
        let time = options.start_time();
        TickCursor::open(vec![self.clone()], time, options, Selection::All, Selection::All)
    }

    /// Cursor over this stream positioned at `time`.
    ///
    /// `None` subscribes to every type (entity); an empty slice to none.
    pub fn select(
        &self,
        time: Timestamp,
        options: SelectionOptions,
        types: Option<&[&str]>,
        entities: Option<&[&str]>,
    ) -> Result<TickCursor> {
        TickCursor::open(
            vec![self.clone()],
            time,
            options,
            Selection::from_names(types),
            Selection::from_names(entities),
        )
    }

    pub fn create_loader(&self, options: LoadingOptions) -> Result<TickLoader> {
        TickLoader::new(self.clone(), options)
    }

    /// First and last timestamp of the stream.
    pub fn time_range(&self) -> Result<Option<(Timestamp, Timestamp)>> {
        self.log.ensure_live()?;
        Ok(self.log.index.read().time_range(None))
    }

    /// First and last timestamp over the given entities.
    pub fn entity_time_range(&self, symbols: &[&str]) -> Result<Option<(Timestamp, Timestamp)>> {
        self.log.ensure_live()?;
        let ids = self.log.entity_ids(symbols)?;
        Ok(self.log.index.read().time_range(Some(&ids)))
    }

    /// Symbols of entities that currently have data.
    pub fn list_entities(&self) -> Result<Vec<String>> {
        self.log.ensure_live()?;
        let ids = self.log.index.read().entities();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.log.entities.symbol(id))
            .map(|s| s.to_string())
            .collect())
    }

    /// Remove messages at or after `time`, for some entities or all.
    pub fn truncate(&self, time: Timestamp, symbols: Option<&[&str]>) -> Result<()> {
        let entities = symbols.map(|s| self.log.entity_ids(s)).transpose()?;
        info!(stream = %self.key(), time = %time, "truncating stream");
        self.log.maintain(LogEntry::Truncated { time, entities })
    }

    /// Remove messages before `time`.
    pub fn purge(&self, time: Timestamp) -> Result<()> {
        info!(stream = %self.key(), time = %time, "purging stream");
        self.log.maintain(LogEntry::Purged { time })
    }

    /// Remove every message, for some entities or all.
    pub fn clear(&self, symbols: Option<&[&str]>) -> Result<()> {
        let entities = symbols.map(|s| self.log.entity_ids(s)).transpose()?;
        info!(stream = %self.key(), "clearing stream");
        self.log.maintain(LogEntry::Cleared { entities })
    }

    /// Spaces holding data; the default space is listed as `""`.
    pub fn list_spaces(&self) -> Result<Vec<String>> {
        self.log.ensure_live()?;
        let spaces: BTreeSet<String> = self.log.index.read().spaces();
        Ok(spaces.into_iter().collect())
    }

    pub fn space_time_range(&self, space: &str) -> Result<Option<(Timestamp, Timestamp)>> {
        self.log.ensure_live()?;
        Ok(self.log.index.read().space_time_range(space))
    }

    pub fn rename_space(&self, from: &str, to: &str) -> Result<()> {
        self.log.maintain(LogEntry::SpaceRenamed {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn delete_spaces(&self, spaces: &[&str]) -> Result<()> {
        self.log.maintain(LogEntry::SpacesDeleted {
            spaces: spaces.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Number of committed messages.
    pub fn message_count(&self) -> usize {
        self.log.index.read().len()
    }
}

impl fmt::Debug for TickStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickStream")
            .field("key", &self.key())
            .field("id", &self.id())
            .finish()
    }
}

impl PartialEq for TickStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.log, &other.log)
    }
}

impl Eq for TickStream {}

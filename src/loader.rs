//! Buffered writer for one stream.
//!
//! `send` validates and buffers; nothing becomes visible to cursors until
//! `flush` (or `close`) commits the buffer to the stream in one batch.

use crate::error::{Result, TickDbError};
use crate::stream::TickStream;
use crate::types::{
    EntityId, EntityRef, LoadingOptions, Message, MessageInput, Timestamp, TypeDescriptor, TypeId,
    TypeRef,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TickLoader {
    stream: TickStream,
    space: Option<Arc<str>>,

    /// Types registered through this loader, with descriptors resolved once.
    types: HashMap<TypeId, (Arc<str>, Arc<TypeDescriptor>)>,

    buffer: Vec<Message>,
    closed: bool,
}

impl TickLoader {
    pub(crate) fn new(stream: TickStream, options: LoadingOptions) -> Result<Self> {
        stream.log().ensure_live()?;
        debug!(stream = %stream.key(), space = ?options.space, "opened loader");

        Ok(Self {
            stream,
            space: options.space.filter(|s| !s.is_empty()).map(Arc::from),
            types: HashMap::new(),
            buffer: Vec::new(),
            closed: false,
        })
    }

    pub fn stream(&self) -> &TickStream {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of sent messages not yet flushed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TickDbError::InvalidState("Loader is closed".into()));
        }
        Ok(())
    }

    /// Register a message type. Returns the same id for the same name, across
    /// every loader of the stream.
    pub fn register_type(&mut self, name: &str) -> Result<TypeId> {
        self.ensure_open()?;
        let (id, descriptor) = self.stream.log().register_type(name)?;
        self.types
            .entry(id)
            .or_insert_with(|| (Arc::from(name), descriptor));
        Ok(id)
    }

    /// Register an instrument symbol. Idempotent like `register_type`.
    pub fn register_instrument(&mut self, symbol: &str) -> Result<EntityId> {
        self.ensure_open()?;
        self.stream.log().register_entity(symbol)
    }

    /// Validate and buffer a message.
    pub fn send(&mut self, input: MessageInput) -> Result<()> {
        self.ensure_open()?;

        let type_id = match &input.message_type {
            TypeRef::Id(id) => *id,
            TypeRef::Name(name) => self.register_type(name)?,
        };
        let (type_name, descriptor) = self.types.get(&type_id).cloned().ok_or_else(|| {
            TickDbError::SchemaViolation(format!(
                "Type id {} is not registered with this loader",
                type_id.0
            ))
        })?;

        let (entity_id, symbol) = match &input.entity {
            EntityRef::Id(id) => {
                let symbol = self
                    .stream
                    .log()
                    .entities
                    .symbol(*id)
                    .ok_or_else(|| TickDbError::EntityNotFound(format!("entity id {}", id.0)))?;
                (*id, symbol)
            }
            EntityRef::Symbol(symbol) => {
                let id = self.register_instrument(symbol)?;
                (id, Arc::from(symbol.as_str()))
            }
        };

        descriptor.validate(&input.fields)?;

        self.buffer.push(Message {
            timestamp: input.timestamp.unwrap_or_else(Timestamp::now),
            type_id,
            type_name,
            entity_id,
            symbol,
            space: self.space.clone(),
            sequence: 0,
            fields: input.fields,
        });
        Ok(())
    }

    /// Commit every buffered message. Once this returns, every cursor reading
    /// the stream observes them. On failure the buffer is kept for a retry.
    pub fn flush(&mut self) -> Result<usize> {
        self.ensure_open()?;
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let committed = self.stream.log().commit(&self.buffer)?;
        self.buffer.clear();
        debug!(stream = %self.stream.key(), messages = committed, "flushed loader");
        Ok(committed)
    }

    /// Flush and release the loader. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        debug!(stream = %self.stream.key(), "closed loader");
        Ok(())
    }
}

impl Drop for TickLoader {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close() {
            warn!(
                stream = %self.stream.key(),
                unflushed = self.buffer.len(),
                error = %e,
                "loader dropped without a successful close"
            );
        }
    }
}

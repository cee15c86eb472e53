//! Name to numeric-id interning for message types and entities.
//!
//! Registries live as long as their stream, so ids handed to one loader are
//! reused by every later loader against the same stream. Registration takes
//! the write lock before assigning, which makes concurrent registration of the
//! same name converge on a single id.

use crate::error::{Result, TickDbError};
use crate::types::{EntityId, TypeDescriptor, TypeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct Interned<V> {
    by_name: HashMap<Arc<str>, u32>,
    entries: Vec<(Arc<str>, V)>,
}

/// Append-only `name -> id` map with a value attached to each id.
pub struct Registry<V> {
    inner: RwLock<Interned<V>>,
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Interned {
                by_name: HashMap::new(),
                entries: Vec::new(),
            }),
        }
    }

    /// Return the id for `name`, assigning the next one if it is new.
    ///
    /// `make` builds the value for a new id and runs under the write lock, so
    /// side effects it performs are ordered by id. Returns `true` alongside the
    /// id when it was assigned by this call.
    pub fn register_with<F>(&self, name: &str, make: F) -> Result<(u32, V, bool)>
    where
        F: FnOnce(u32, &str) -> Result<V>,
    {
        if let Some(found) = self.lookup(name) {
            return Ok((found.0, found.1, false));
        }

        let mut inner = self.inner.write();
        // Another registration may have won the race for the write lock.
        if let Some(&id) = inner.by_name.get(name) {
            let value = inner.entries[id as usize].1.clone();
            return Ok((id, value, false));
        }

        let id = inner.entries.len() as u32;
        let value = make(id, name)?;
        let key: Arc<str> = Arc::from(name);
        inner.by_name.insert(Arc::clone(&key), id);
        inner.entries.push((key, value.clone()));
        Ok((id, value, true))
    }

    /// Re-insert an entry read back from disk. Ids must arrive in order.
    pub fn restore(&self, id: u32, name: &str, value: V) -> Result<()> {
        let mut inner = self.inner.write();
        if id as usize != inner.entries.len() {
            return Err(TickDbError::Corruption(format!(
                "registry id {} for '{}' out of order (expected {})",
                id,
                name,
                inner.entries.len()
            )));
        }
        let key: Arc<str> = Arc::from(name);
        inner.by_name.insert(Arc::clone(&key), id);
        inner.entries.push((key, value));
        Ok(())
    }

    /// Id and value for `name`, if registered.
    pub fn lookup(&self, name: &str) -> Option<(u32, V)> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|&id| (id, inner.entries[id as usize].1.clone()))
    }

    /// Name and value for `id`, if assigned.
    pub fn get(&self, id: u32) -> Option<(Arc<str>, V)> {
        self.inner
            .read()
            .entries
            .get(id as usize)
            .map(|(name, value)| (Arc::clone(name), value.clone()))
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All names in id order.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(name, _)| Arc::clone(name))
            .collect()
    }
}

impl<V: Clone> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Message types registered against one stream, with their resolved schema.
#[derive(Default)]
pub struct TypeRegistry {
    registry: Registry<Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; `resolve` is consulted only for names not seen before.
    pub fn register<F>(&self, name: &str, resolve: F) -> Result<(TypeId, Arc<TypeDescriptor>, bool)>
    where
        F: FnOnce(TypeId, &str) -> Result<Arc<TypeDescriptor>>,
    {
        let (id, descriptor, created) = self
            .registry
            .register_with(name, |id, name| resolve(TypeId(id), name))?;
        Ok((TypeId(id), descriptor, created))
    }

    pub fn restore(&self, id: TypeId, descriptor: TypeDescriptor) -> Result<()> {
        let name = descriptor.name.clone();
        self.registry.restore(id.0, &name, Arc::new(descriptor))
    }

    pub fn id_of(&self, name: &str) -> Option<TypeId> {
        self.registry.lookup(name).map(|(id, _)| TypeId(id))
    }

    pub fn get(&self, id: TypeId) -> Option<(Arc<str>, Arc<TypeDescriptor>)> {
        self.registry.get(id.0)
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        self.registry.names()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

/// Entities (instrument symbols) registered against one stream.
#[derive(Default)]
pub struct EntityRegistry {
    registry: Registry<()>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a symbol; `persist` runs once, for a newly assigned id.
    pub fn register<F>(&self, symbol: &str, persist: F) -> Result<(EntityId, bool)>
    where
        F: FnOnce(EntityId, &str) -> Result<()>,
    {
        let (id, _, created) = self
            .registry
            .register_with(symbol, |id, symbol| persist(EntityId(id), symbol))?;
        Ok((EntityId(id), created))
    }

    pub fn restore(&self, id: EntityId, symbol: &str) -> Result<()> {
        self.registry.restore(id.0, symbol, ())
    }

    pub fn id_of(&self, symbol: &str) -> Option<EntityId> {
        self.registry.lookup(symbol).map(|(id, _)| EntityId(id))
    }

    pub fn symbol(&self, id: EntityId) -> Option<Arc<str>> {
        self.registry.get(id.0).map(|(name, _)| name)
    }

    pub fn symbols(&self) -> Vec<Arc<str>> {
        self.registry.names()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

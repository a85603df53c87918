//! Entity and component state shared by the world and its queries.
//!
//! [`Store`] is the part of the [`World`](crate::world::World) that queries
//! read while they are being updated: the allocator, the entity records, the
//! per-type storages, the registries and the active entity list. Keeping it in
//! its own struct lets the world borrow its query list mutably while handing
//! queries a shared reference to the store.

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityAllocator, EntityId, EntityRecord, EntitySet};
use crate::storage::{ComponentStorage, ErasedStorage};
use crate::token::{TagRegistry, Token};

#[derive(Default)]
pub(crate) struct Store {
    pub allocator: EntityAllocator,
    /// Indexed by entity index.
    pub records: Vec<Option<EntityRecord>>,
    pub registry: ComponentRegistry,
    pub tags: TagRegistry,
    /// Indexed by `ComponentTypeId`.
    pub storages: Vec<Box<dyn ErasedStorage>>,
    /// Registered entities, in registration order (modulo swap-removes).
    pub active: EntitySet,
}

impl Store {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The record for `id`, if `id` is the live handle at its index.
    pub(crate) fn record(&self, id: EntityId) -> Option<&EntityRecord> {
        self.records
            .get(id.index() as usize)?
            .as_ref()
            .filter(|record| record.id == id)
    }

    pub(crate) fn record_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
        self.records
            .get_mut(id.index() as usize)?
            .as_mut()
            .filter(|record| record.id == id)
    }

    pub(crate) fn put_record(&mut self, record: EntityRecord) {
        let index = record.id.index() as usize;
        if self.records.len() <= index {
            self.records.resize_with(index + 1, || None);
        }
        self.records[index] = Some(record);
    }

    pub(crate) fn type_id_of<T: 'static>(&self) -> ComponentTypeId {
        self.registry.lookup::<T>().unwrap_or_else(|| {
            panic!(
                "component type {} not registered -- call world.register_component::<T>() first",
                std::any::type_name::<T>()
            )
        })
    }

    pub(crate) fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        let type_id = self.registry.lookup::<T>()?;
        self.storages[type_id.index()]
            .as_any()
            .downcast_ref::<ComponentStorage<T>>()
    }

    pub(crate) fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        let type_id = self.registry.lookup::<T>()?;
        self.storages[type_id.index()]
            .as_any_mut()
            .downcast_mut::<ComponentStorage<T>>()
    }

    pub(crate) fn erased(&self, type_id: ComponentTypeId) -> &dyn ErasedStorage {
        self.storages[type_id.index()].as_ref()
    }

    pub(crate) fn erased_mut(&mut self, type_id: ComponentTypeId) -> &mut dyn ErasedStorage {
        self.storages[type_id.index()].as_mut()
    }

    /// Every token an entity currently presents to queries.
    pub(crate) fn tokens_of(record: &EntityRecord) -> impl Iterator<Item = Token> + '_ {
        record
            .components
            .iter()
            .map(|&c| Token::Component(c))
            .chain(record.tags.iter().map(|&t| Token::Tag(t)))
    }

    pub(crate) fn view(&self, id: EntityId) -> Option<EntityView<'_>> {
        self.record(id).map(|record| EntityView {
            store: self,
            record,
        })
    }
}

// ---------------------------------------------------------------------------
// EntityView
// ---------------------------------------------------------------------------

/// Read-only view of one entity as queries see it.
///
/// Only *registered* state is visible: a component whose registration is still
/// queued reads as absent here even though
/// [`World::get_component`](crate::world::World::get_component) already
/// returns it.
#[derive(Clone, Copy)]
pub struct EntityView<'w> {
    store: &'w Store,
    record: &'w EntityRecord,
}

impl<'w> EntityView<'w> {
    /// The entity's handle.
    pub fn id(&self) -> EntityId {
        self.record.id
    }

    /// The entity's class name.
    pub fn class(&self) -> &'static str {
        self.record.class
    }

    /// Whether the entity is in the active list.
    pub fn is_registered(&self) -> bool {
        self.record.registered
    }

    /// Whether the entity presents `token`.
    pub fn has_token(&self, token: Token) -> bool {
        match token {
            Token::Component(c) => self.record.components.contains(&c),
            Token::Tag(t) => self.record.tags.contains(&t),
        }
    }

    /// Whether a registered component of type `T` is present.
    pub fn has<T: 'static>(&self) -> bool {
        self.store
            .registry
            .lookup::<T>()
            .is_some_and(|c| self.record.components.contains(&c))
    }

    /// The registered component of type `T`, if present.
    pub fn get<T: Component>(&self) -> Option<&'w T> {
        let slot = self.store.storage::<T>()?.get(self.record.id.index())?;
        slot.meta.registered.then_some(&slot.value)
    }

    /// Whether the entity carries the tag `name`.
    pub fn has_tag(&self, name: &str) -> bool {
        self.store
            .tags
            .lookup(name)
            .is_some_and(|t| self.record.tags.contains(&t))
    }
}

impl std::fmt::Debug for EntityView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityView")
            .field("id", &self.record.id)
            .field("class", &self.record.class)
            .field("registered", &self.record.registered)
            .finish()
    }
}

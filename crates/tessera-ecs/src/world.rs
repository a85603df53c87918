//! The [`World`] is the top-level container for the ECS. It owns the entities,
//! component storages, queries, pools, systems and routines, and drives the
//! per-tick order.
//!
//! # Tick order
//!
//! [`World::tick`] runs, in order:
//!
//! 1. derive `delta_time` from the injected absolute time;
//! 2. clear every query's `added` and `deleted` sets;
//! 3. drain the deferred command queue, including commands queued while
//!    draining;
//! 4. flush the pending changes into every query;
//! 5. apply commands queued with [`World::defer_after_flush`] (their changes
//!    reach queries on the next tick);
//! 6. run systems by descending priority;
//! 7. step routines.

use std::any::TypeId;
use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, trace};

use crate::command::{ApplyReport, Command, CommandQueue, PendingChanges};
use crate::component::{
    Component, ComponentId, ComponentKey, ComponentMeta, ComponentRegistry, ComponentTypeId,
};
use crate::entity::{EntityId, EntityRecord, EntitySet};
use crate::pool::EntityPool;
use crate::query::Query;
use crate::routine::Routines;
use crate::storage::{ComponentStorage, Slot};
use crate::store::{EntityView, Store};
use crate::system::{SystemEntry, SystemId};
use crate::token::{TagId, Token};
use crate::EcsError;

/// Class name of entities spawned without one.
pub const DEFAULT_CLASS: &str = "Entity";

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// What one call to [`World::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Tick counter after this tick (the first tick is 1).
    pub tick: u64,
    /// World time (ms) of this tick.
    pub time: f64,
    /// Milliseconds since the previous tick.
    pub delta_time: f64,
    /// Deferred and after-flush commands.
    pub commands: ApplyReport,
    /// Entities whose pending changes were flushed into queries.
    pub changes_flushed: usize,
    pub systems_run: usize,
    pub routines_stepped: usize,
    pub routines_finished: usize,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level ECS container.
pub struct World {
    pub(crate) store: Store,
    /// Indexed by `QueryId.0`; removed queries leave a `None`.
    pub(crate) queries: Vec<Option<Query>>,
    pub(crate) pools: Vec<EntityPool>,
    /// Sorted by descending priority, ties in registration order.
    pub(crate) systems: Vec<SystemEntry>,
    pub(crate) system_types: HashMap<TypeId, SystemId>,
    pub(crate) next_system: u32,
    pub(crate) routines: Routines,
    pub(crate) pending: PendingChanges,
    pub(crate) commands: CommandQueue,
    pub(crate) after_flush: CommandQueue,
    pub(crate) next_component_id: u64,
    pub(crate) time: f64,
    delta_time: f64,
    tick_count: u64,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.store.active.len())
            .field("query_count", &self.queries.iter().flatten().count())
            .field("system_count", &self.systems.len())
            .field("time", &self.time)
            .field("tick_count", &self.tick_count)
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new, empty world at time 0.
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            queries: Vec::new(),
            pools: Vec::new(),
            systems: Vec::new(),
            system_types: HashMap::new(),
            next_system: 0,
            routines: Routines::default(),
            pending: PendingChanges::new(),
            commands: CommandQueue::new(),
            after_flush: CommandQueue::new(),
            next_component_id: 0,
            time: 0.0,
            delta_time: 0.0,
            tick_count: 0,
        }
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.store.registry
    }

    /// Register a component type under `name` and create its storage.
    ///
    /// Registering the same type again returns the existing id.
    pub fn register_component<T: Component>(&mut self, name: &str) -> ComponentTypeId {
        let (id, fresh) = self.store.registry.register::<T>(name);
        if fresh {
            self.store
                .storages
                .push(Box::new(ComponentStorage::<T>::new()));
        }
        id
    }

    /// The id of a registered component type.
    pub fn component_type<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.store.registry.lookup::<T>()
    }

    /// Intern a tag name for use in query filters.
    pub fn tag_id(&mut self, name: &str) -> TagId {
        self.store.tags.intern(name)
    }

    /// The name behind an interned tag.
    pub fn tag_name(&self, tag: TagId) -> &str {
        self.store.tags.name(tag)
    }

    /// World time (ms) of the last tick.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Milliseconds between the last two ticks.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // -- entity lifecycle ---------------------------------------------------

    fn ensure_live(&self, entity: EntityId) -> Result<&EntityRecord, EcsError> {
        self.store
            .record(entity)
            .filter(|record| !record.in_pool)
            .ok_or(EcsError::StaleEntity { entity })
    }

    /// Spawn an entity of the default class. It joins queries at the next
    /// flush.
    pub fn spawn(&mut self) -> EntityId {
        self.spawn_as(DEFAULT_CLASS)
    }

    /// Spawn an entity of `class`. It joins queries at the next flush.
    pub fn spawn_as(&mut self, class: &'static str) -> EntityId {
        let entity = self.create_entity(class);
        self.commands.push(Command::RegisterEntity(entity));
        entity
    }

    /// Spawn an entity of the default class and register it at once.
    ///
    /// It still reaches queries only at the next flush.
    pub fn spawn_immediate(&mut self) -> EntityId {
        let entity = self.create_entity(DEFAULT_CLASS);
        self.apply_register_entity(entity);
        entity
    }

    fn create_entity(&mut self, class: &'static str) -> EntityId {
        let entity = self.store.allocator.allocate();
        self.store
            .put_record(EntityRecord::new(entity, class, self.time));
        entity
    }

    /// Immediate form of the registration queued by [`spawn`](Self::spawn).
    pub fn register_entity_immediate(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let pool = self.ensure_live(entity)?.pool;
        match pool {
            Some(pool) => self.register_pooled(entity, pool),
            None => self.apply_register_entity(entity),
        };
        Ok(())
    }

    /// Queue destruction of an entity, or its return to its pool.
    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        self.commands.push(Command::DestroyEntity(entity));
        Ok(())
    }

    /// Destroy an entity now. Queries drop it at the next flush.
    pub fn destroy_entity_immediate(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        self.apply_destroy_entity(entity);
        Ok(())
    }

    /// Whether `entity` is a live handle. Parked pooled entities are not.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.ensure_live(entity).is_ok()
    }

    /// The live handle at `index`, for comparing against a cached handle.
    pub fn current_id(&self, index: u32) -> Option<EntityId> {
        self.store.allocator.current(index)
    }

    /// Whether the entity is in the active list.
    pub fn is_registered(&self, entity: EntityId) -> bool {
        self.store.record(entity).is_some_and(|r| r.registered)
    }

    /// The registered entities, in active-list order.
    pub fn entities(&self) -> &EntitySet {
        &self.store.active
    }

    /// Number of registered entities.
    pub fn entity_count(&self) -> usize {
        self.store.active.len()
    }

    /// Class name of a live entity.
    pub fn class_of(&self, entity: EntityId) -> Option<&'static str> {
        self.ensure_live(entity).ok().map(|r| r.class)
    }

    /// World time at which the entity was registered or last checked out.
    pub fn created_at(&self, entity: EntityId) -> Option<f64> {
        self.ensure_live(entity).ok().map(|r| r.created)
    }

    /// A query's-eye view of a live entity.
    pub fn view(&self, entity: EntityId) -> Option<EntityView<'_>> {
        self.ensure_live(entity).ok()?;
        self.store.view(entity)
    }

    // -- components ---------------------------------------------------------

    fn new_meta(&mut self, owner: EntityId, type_id: ComponentTypeId, registered: bool) -> ComponentMeta {
        let id = ComponentId(self.next_component_id);
        self.next_component_id += 1;
        ComponentMeta {
            id,
            owner,
            type_id,
            version: 0,
            created: self.time,
            registered,
        }
    }

    fn insert_component<T: Component>(
        &mut self,
        entity: EntityId,
        value: T,
        registered: bool,
    ) -> Result<ComponentTypeId, EcsError> {
        self.ensure_live(entity)?;
        let type_id = self.store.type_id_of::<T>();
        let meta = self.new_meta(entity, type_id, registered);
        self.store
            .storage_mut::<T>()
            .unwrap_or_else(|| panic!("storage for {} missing", std::any::type_name::<T>()))
            .insert(Slot { meta, value });
        Ok(type_id)
    }

    /// Attach a component. The data is readable at once; queries see it
    /// after the next flush.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not registered or the entity already has a `T`.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<(), EcsError> {
        let component = self.insert_component(entity, value, false)?;
        self.commands
            .push(Command::RegisterComponent { entity, component });
        Ok(())
    }

    /// Attach and register a component now.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not registered or the entity already has a `T`.
    pub fn add_component_immediate<T: Component>(
        &mut self,
        entity: EntityId,
        value: T,
    ) -> Result<(), EcsError> {
        let component = self.insert_component(entity, value, false)?;
        self.apply_register_component(entity, component);
        Ok(())
    }

    /// Attach a component by registered name from JSON. Registration is
    /// deferred like [`add_component`](Self::add_component).
    pub fn add_component_json(
        &mut self,
        entity: EntityId,
        name: &str,
        data: &Value,
    ) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        let component = self
            .store
            .registry
            .lookup_by_name(name)
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
                registered: self.store.registry.registered_names().join(", "),
            })?;
        assert!(
            !self.store.erased(component).contains(entity.index()),
            "entity {entity} already has a component of type '{name}'"
        );
        let meta = self.new_meta(entity, component, false);
        if let Err(err) = self.store.erased_mut(component).insert_json(meta, data) {
            return Err(EcsError::ComponentDeserialization {
                component: name.to_owned(),
                details: err.to_string(),
            });
        }
        self.commands
            .push(Command::RegisterComponent { entity, component });
        Ok(())
    }

    /// Immediate form of the registration queued by
    /// [`add_component`](Self::add_component). Returns `false` if there was
    /// nothing to register.
    pub fn register_component_immediate<T: Component>(
        &mut self,
        entity: EntityId,
    ) -> Result<bool, EcsError> {
        self.ensure_live(entity)?;
        let component = self.store.type_id_of::<T>();
        Ok(self.apply_register_component(entity, component))
    }

    /// Queue removal of a component.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        let component = self.store.type_id_of::<T>();
        self.commands
            .push(Command::DestroyComponent { entity, component });
        Ok(())
    }

    /// Remove a component now. Returns `false` if the entity had none.
    ///
    /// # Panics
    ///
    /// Panics if the component belongs to the entity's pool shape.
    pub fn remove_component_immediate<T: Component>(
        &mut self,
        entity: EntityId,
    ) -> Result<bool, EcsError> {
        self.ensure_live(entity)?;
        let component = self.store.type_id_of::<T>();
        Ok(self.apply_destroy_component(entity, component))
    }

    /// The component of type `T`, including one whose registration is still
    /// queued.
    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.ensure_live(entity).ok()?;
        self.store
            .storage::<T>()?
            .get(entity.index())
            .map(|slot| &slot.value)
    }

    /// Mutable access to the component of type `T`.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.ensure_live(entity).ok()?;
        self.store
            .storage_mut::<T>()?
            .get_mut(entity.index())
            .map(|slot| &mut slot.value)
    }

    /// Whether the entity has a component of type `T`.
    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        self.get_component::<T>(entity).is_some()
    }

    pub fn component_meta<T: Component>(&self, entity: EntityId) -> Option<&ComponentMeta> {
        self.ensure_live(entity).ok()?;
        self.store
            .storage::<T>()?
            .get(entity.index())
            .map(|slot| &slot.meta)
    }

    /// A stale-checkable key for the entity's current `T`.
    pub fn component_key<T: Component>(&self, entity: EntityId) -> Option<ComponentKey> {
        self.component_meta::<T>(entity).map(ComponentMeta::key)
    }

    /// Resolve a key. `None` once the component was destroyed or recycled.
    pub fn component_by_key<T: Component>(&self, key: ComponentKey) -> Option<&T> {
        self.ensure_live(key.owner).ok()?;
        let slot = self.store.storage::<T>()?.get(key.owner.index())?;
        (slot.meta.id == key.id && slot.meta.version == key.version).then_some(&slot.value)
    }

    // -- tags ---------------------------------------------------------------

    /// Queue a tag.
    pub fn add_tag(&mut self, entity: EntityId, name: &str) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        let tag = self.store.tags.intern(name);
        self.commands.push(Command::AddTag { entity, tag });
        Ok(())
    }

    /// Apply a tag now. Returns `false` if it was already present.
    pub fn add_tag_immediate(&mut self, entity: EntityId, name: &str) -> Result<bool, EcsError> {
        self.ensure_live(entity)?;
        let tag = self.store.tags.intern(name);
        Ok(self.apply_add_tag(entity, tag))
    }

    /// Queue removal of a tag.
    pub fn remove_tag(&mut self, entity: EntityId, name: &str) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        let tag = self.store.tags.intern(name);
        self.commands.push(Command::RemoveTag { entity, tag });
        Ok(())
    }

    /// Remove a tag now. Returns `false` if it was absent.
    ///
    /// # Panics
    ///
    /// Panics if the tag belongs to the entity's pool shape.
    pub fn remove_tag_immediate(&mut self, entity: EntityId, name: &str) -> Result<bool, EcsError> {
        self.ensure_live(entity)?;
        let tag = self.store.tags.intern(name);
        Ok(self.apply_remove_tag(entity, tag))
    }

    /// Whether the tag is applied.
    pub fn has_tag(&self, entity: EntityId, name: &str) -> bool {
        let Some(tag) = self.store.tags.lookup(name) else {
            return false;
        };
        self.ensure_live(entity)
            .is_ok_and(|record| record.tags.contains(&tag))
    }

    /// Applied tags, in interning order.
    pub fn tags(&self, entity: EntityId) -> Vec<&str> {
        match self.ensure_live(entity) {
            Ok(record) => record
                .tags
                .iter()
                .map(|&tag| self.store.tags.name(tag))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    // -- deferred commands --------------------------------------------------

    /// Queue a command to run after this tick's flush, before systems. Its
    /// changes reach queries on the next tick.
    pub fn defer_after_flush(&mut self, command: Command) {
        self.after_flush.push(command);
    }

    /// Commands waiting for the next tick.
    pub fn pending_commands(&self) -> usize {
        self.commands.len() + self.after_flush.len()
    }

    /// Apply one command. Returns `false` if it had nothing to do.
    pub(crate) fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::RegisterEntity(entity) => self.apply_register_entity(entity),
            Command::DestroyEntity(entity) => self.apply_destroy_entity(entity),
            Command::RegisterComponent { entity, component } => {
                self.apply_register_component(entity, component)
            }
            Command::DestroyComponent { entity, component } => {
                self.apply_destroy_component(entity, component)
            }
            Command::AddTag { entity, tag } => self.apply_add_tag(entity, tag),
            Command::RemoveTag { entity, tag } => self.apply_remove_tag(entity, tag),
            Command::RegisterPooled { entity, pool } => self.register_pooled(entity, pool),
        }
    }

    fn drain(&mut self, after_flush: bool) -> ApplyReport {
        let mut report = ApplyReport::default();
        loop {
            let next = if after_flush {
                self.after_flush.pop()
            } else {
                self.commands.pop()
            };
            let Some(command) = next else {
                break;
            };
            if self.apply(command) {
                report.applied += 1;
            } else {
                report.skipped += 1;
                debug!(?command, "skipped deferred command");
            }
        }
        report
    }

    fn apply_register_entity(&mut self, entity: EntityId) -> bool {
        let time = self.time;
        let Some(record) = self.store.record_mut(entity) else {
            return false;
        };
        if record.registered || record.pool.is_some() {
            return false;
        }
        record.registered = true;
        record.created = time;
        let tokens: Vec<Token> = Store::tokens_of(record).collect();
        self.store.active.insert(entity);
        for token in tokens {
            self.pending.record_token(entity, token);
        }
        true
    }

    fn apply_destroy_entity(&mut self, entity: EntityId) -> bool {
        let Some(record) = self.store.record(entity) else {
            return false;
        };
        if record.in_pool {
            return false;
        }
        if record.pool.is_some() {
            return self.return_to_pool(entity);
        }

        let index = entity.index();
        for storage in &mut self.store.storages {
            storage.remove(index);
        }
        self.store.active.remove(entity);
        self.store.records[index as usize] = None;
        self.store.allocator.deallocate(entity);
        self.pending.record_removed(entity);
        true
    }

    fn apply_register_component(&mut self, entity: EntityId, component: ComponentTypeId) -> bool {
        if self.ensure_live(entity).is_err() {
            return false;
        }
        let time = self.time;
        let Some(meta) = self
            .store
            .erased_mut(component)
            .meta_mut(entity.index())
        else {
            return false;
        };
        if meta.registered || meta.owner != entity {
            return false;
        }
        meta.registered = true;
        meta.created = time;
        if let Some(record) = self.store.record_mut(entity) {
            record.components.insert(component);
        }
        self.pending
            .record_token(entity, Token::Component(component));
        true
    }

    fn apply_destroy_component(&mut self, entity: EntityId, component: ComponentTypeId) -> bool {
        let Ok(record) = self.ensure_live(entity) else {
            return false;
        };
        if let Some(pool) = record.pool {
            assert!(
                !self.pools[pool.index()].is_shape_token(Token::Component(component)),
                "cannot remove shape component '{}' from pooled entity {entity}",
                self.store.registry.name(component)
            );
        }
        if self
            .store
            .erased_mut(component)
            .remove(entity.index())
            .is_none()
        {
            return false;
        }
        let was_registered = self
            .store
            .record_mut(entity)
            .is_some_and(|record| record.components.remove(&component));
        if was_registered {
            self.pending
                .record_token(entity, Token::Component(component));
        }
        true
    }

    fn apply_add_tag(&mut self, entity: EntityId, tag: TagId) -> bool {
        if self.ensure_live(entity).is_err() {
            return false;
        }
        let added = self
            .store
            .record_mut(entity)
            .is_some_and(|record| record.tags.insert(tag));
        if added {
            self.pending.record_token(entity, Token::Tag(tag));
        }
        added
    }

    fn apply_remove_tag(&mut self, entity: EntityId, tag: TagId) -> bool {
        let Ok(record) = self.ensure_live(entity) else {
            return false;
        };
        if let Some(pool) = record.pool {
            assert!(
                !self.pools[pool.index()].is_shape_token(Token::Tag(tag)),
                "cannot remove shape tag '{}' from pooled entity {entity}",
                self.store.tags.name(tag)
            );
        }
        let removed = self
            .store
            .record_mut(entity)
            .is_some_and(|record| record.tags.remove(&tag));
        if removed {
            self.pending.record_token(entity, Token::Tag(tag));
        }
        removed
    }

    // -- tick ---------------------------------------------------------------

    /// Advance the world to absolute time `now_ms`.
    pub fn tick(&mut self, now_ms: f64) -> TickReport {
        self.delta_time = now_ms - self.time;
        self.time = now_ms;
        self.tick_count += 1;

        for query in self.queries.iter_mut().flatten() {
            query.clear_transient();
        }

        let mut commands = self.drain(false);
        let changes_flushed = self.flush();
        commands.merge(self.drain(true));
        let systems_run = self.run_systems();
        let (routines_stepped, routines_finished) = self.step_routines();

        let report = TickReport {
            tick: self.tick_count,
            time: self.time,
            delta_time: self.delta_time,
            commands,
            changes_flushed,
            systems_run,
            routines_stepped,
            routines_finished,
        };
        trace!(
            tick = report.tick,
            delta_time = report.delta_time,
            applied = report.commands.applied,
            skipped = report.commands.skipped,
            changes = report.changes_flushed,
            systems = report.systems_run,
            routines = report.routines_stepped,
            "tick complete"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

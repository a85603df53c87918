//! Entity pools for spawn-heavy classes with a fixed shape.
//!
//! A pool hands out entities that always carry the same component types and
//! tags; only the component data varies between checkouts. Returning a pooled
//! entity (destroying it) parks it on the pool's free list without bumping its
//! generation, and the next checkout resets its data in place from the pool
//! defaults.
//!
//! Because the shape is fixed, the pool knows up front which queries every
//! instance will match. Checked-out instances are inserted straight into those
//! queries at the flush, without evaluating their filters.

use std::any::TypeId;
use std::collections::{BTreeSet, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::command::Command;
use crate::component::{Component, ComponentId, ComponentMeta, ComponentTypeId};
use crate::entity::{EntityId, EntityRecord};
use crate::query::QueryId;
use crate::token::{TagId, Token};
use crate::world::World;
use crate::EcsError;

/// Identifier of a pool registered in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub(crate) u32);

impl PoolId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// PoolSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ShapeKey {
    Type {
        type_id: TypeId,
        type_name: &'static str,
    },
    Name(String),
}

#[derive(Debug, Clone)]
struct ShapeComponent {
    key: ShapeKey,
    /// Serialized default, or the serialization error.
    data: Result<Value, String>,
}

/// Builder describing a pool's fixed shape.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Position(f32, f32);
///
/// let mut world = World::new();
/// world.register_component::<Position>("position");
///
/// let bullets = world
///     .create_pool(PoolSpec::new("Bullet").tag("bullet").component(Position(0.0, 0.0)))
///     .unwrap();
/// let bullet = world.pool_get(bullets).unwrap();
/// assert!(world.has_component::<Position>(bullet));
/// ```
#[derive(Debug, Clone)]
pub struct PoolSpec {
    class: &'static str,
    tags: Vec<String>,
    components: Vec<ShapeComponent>,
}

impl PoolSpec {
    /// A spec for entities of `class` with an empty shape.
    pub fn new(class: &'static str) -> Self {
        Self {
            class,
            tags: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Add a fixed tag.
    pub fn tag(mut self, name: &str) -> Self {
        self.tags.push(name.to_owned());
        self
    }

    /// Add a fixed component with its default value.
    pub fn component<T: Component>(mut self, default: T) -> Self {
        self.components.push(ShapeComponent {
            key: ShapeKey::Type {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
            data: serde_json::to_value(&default).map_err(|e| e.to_string()),
        });
        self
    }

    /// Add a fixed component by registered name, with its default as JSON.
    pub fn component_json(mut self, name: &str, default: Value) -> Self {
        self.components.push(ShapeComponent {
            key: ShapeKey::Name(name.to_owned()),
            data: Ok(default),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// EntityPool
// ---------------------------------------------------------------------------

/// Runtime state of one pool.
#[derive(Debug)]
pub struct EntityPool {
    id: PoolId,
    class: &'static str,
    tags: Vec<TagId>,
    components: Vec<(ComponentTypeId, Value)>,
    shape: HashSet<Token>,
    free: Vec<EntityId>,
    matching: BTreeSet<QueryId>,
    checkouts: u64,
    constructed: u64,
}

impl EntityPool {
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Class name given to every pooled entity.
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// Every token of the fixed shape.
    pub fn shape(&self) -> &HashSet<Token> {
        &self.shape
    }

    /// Whether `token` belongs to the fixed shape.
    pub fn is_shape_token(&self, token: Token) -> bool {
        self.shape.contains(&token)
    }

    /// Parked entities ready for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Queries statically known to match every instance.
    pub fn matching_queries(&self) -> &BTreeSet<QueryId> {
        &self.matching
    }

    /// Total number of checkouts.
    pub fn checkouts(&self) -> u64 {
        self.checkouts
    }

    /// Entities constructed because the free list was empty.
    pub fn constructed(&self) -> u64 {
        self.constructed
    }

    pub(crate) fn query_created(&mut self, id: QueryId, statically_matches: bool) {
        if statically_matches {
            self.matching.insert(id);
        } else {
            self.matching.remove(&id);
        }
    }

    pub(crate) fn query_removed(&mut self, id: QueryId) {
        self.matching.remove(&id);
    }
}

// ---------------------------------------------------------------------------
// World integration
// ---------------------------------------------------------------------------

impl World {
    /// Register a pool.
    ///
    /// Every shape component must be registered and every default must
    /// deserialize into its component type.
    ///
    /// # Panics
    ///
    /// Panics if the spec lists a component type twice.
    pub fn create_pool(&mut self, spec: PoolSpec) -> Result<PoolId, EcsError> {
        let id = PoolId(self.pools.len() as u32);
        let mut components = Vec::with_capacity(spec.components.len());
        let mut shape = HashSet::new();

        for entry in spec.components {
            let (type_id, name) = match &entry.key {
                ShapeKey::Type { type_id, type_name } => (
                    self.store.registry.lookup_type_id(*type_id),
                    type_name.to_string(),
                ),
                ShapeKey::Name(name) => (self.store.registry.lookup_by_name(name), name.clone()),
            };
            let type_id = type_id.ok_or_else(|| EcsError::UnknownComponent {
                name: name.clone(),
                registered: self.store.registry.registered_names().join(", "),
            })?;
            let data = entry
                .data
                .map_err(|details| EcsError::ComponentSerialization {
                    component: name.clone(),
                    details,
                })?;
            if let Err(err) = self.store.erased(type_id).validate_json(&data) {
                return Err(EcsError::ComponentDeserialization {
                    component: name,
                    details: err.to_string(),
                });
            }
            assert!(
                shape.insert(Token::Component(type_id)),
                "component '{name}' listed twice in pool spec for '{}'",
                spec.class
            );
            components.push((type_id, data));
        }

        let tags: Vec<TagId> = spec
            .tags
            .iter()
            .map(|name| self.store.tags.intern(name))
            .collect();
        shape.extend(tags.iter().map(|&t| Token::Tag(t)));

        let matching: BTreeSet<QueryId> = self
            .queries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let query = slot.as_ref()?;
                query
                    .statically_matches(&shape)
                    .then_some(QueryId(index as u32))
            })
            .collect();

        debug!(
            pool = ?id,
            class = spec.class,
            components = components.len(),
            tags = tags.len(),
            matching_queries = matching.len(),
            "created entity pool"
        );

        self.pools.push(EntityPool {
            id,
            class: spec.class,
            tags,
            components,
            shape,
            free: Vec::new(),
            matching,
            checkouts: 0,
            constructed: 0,
        });
        Ok(id)
    }

    /// A registered pool.
    pub fn pool(&self, id: PoolId) -> Option<&EntityPool> {
        self.pools.get(id.index())
    }

    /// Check an entity out of a pool.
    ///
    /// Reuses a parked entity, resetting its component data to the defaults,
    /// or constructs a new one. Either way the entity is materialized at once
    /// and joins the active list and its queries at the next flush.
    pub fn pool_get(&mut self, pool: PoolId) -> Result<EntityId, EcsError> {
        let state = self
            .pools
            .get_mut(pool.index())
            .ok_or(EcsError::UnknownPool(pool))?;
        state.checkouts += 1;
        let entity = match state.free.pop() {
            Some(entity) => {
                // The handle is the same across checkouts, so commands queued
                // against the previous checkout must not reach this one.
                let discarded =
                    self.commands.discard_for(entity) + self.after_flush.discard_for(entity);
                if discarded > 0 {
                    debug!(%entity, discarded, "dropped commands from a previous checkout");
                }
                self.reset_pooled(pool, entity)?;
                entity
            }
            None => self.construct_pooled(pool)?,
        };
        self.commands.push(Command::RegisterPooled { entity, pool });
        Ok(entity)
    }

    fn reset_pooled(&mut self, pool: PoolId, entity: EntityId) -> Result<(), EcsError> {
        let state = &self.pools[pool.index()];
        for (type_id, data) in &state.components {
            let result = self
                .store
                .erased_mut(*type_id)
                .overwrite_json(entity.index(), data);
            if let Err(err) = result {
                return Err(EcsError::ComponentDeserialization {
                    component: self.store.registry.name(*type_id).to_owned(),
                    details: err.to_string(),
                });
            }
        }
        if let Some(record) = self.store.record_mut(entity) {
            record.in_pool = false;
        }
        Ok(())
    }

    fn construct_pooled(&mut self, pool: PoolId) -> Result<EntityId, EcsError> {
        let entity = self.store.allocator.allocate();
        let state = &mut self.pools[pool.index()];
        state.constructed += 1;

        let mut record = EntityRecord::new(entity, state.class, self.time);
        record.pool = Some(pool);
        record.tags.extend(state.tags.iter().copied());
        self.store.put_record(record);

        for (type_id, data) in &state.components {
            let meta = ComponentMeta {
                id: ComponentId(self.next_component_id),
                owner: entity,
                type_id: *type_id,
                version: 0,
                created: self.time,
                registered: false,
            };
            self.next_component_id += 1;
            let result = self.store.erased_mut(*type_id).insert_json(meta, data);
            if let Err(err) = result {
                return Err(EcsError::ComponentDeserialization {
                    component: self.store.registry.name(*type_id).to_owned(),
                    details: err.to_string(),
                });
            }
        }
        Ok(entity)
    }

    /// Apply a queued checkout: activate the entity and its shape components.
    pub(crate) fn register_pooled(&mut self, entity: EntityId, pool: PoolId) -> bool {
        let time = self.time;
        let Some(record) = self.store.record_mut(entity) else {
            return false;
        };
        if record.registered || record.in_pool || record.pool != Some(pool) {
            return false;
        }
        record.registered = true;
        record.created = time;
        self.store.active.insert(entity);

        let state = &self.pools[pool.index()];
        for (type_id, _) in &state.components {
            if let Some(meta) = self.store.erased_mut(*type_id).meta_mut(entity.index()) {
                meta.registered = true;
                meta.created = time;
            }
        }
        if let Some(record) = self.store.record_mut(entity) {
            record
                .components
                .extend(state.components.iter().map(|(type_id, _)| *type_id));
        }
        self.pending.record_checkout(entity, pool);
        true
    }

    /// Park a pooled entity on its pool's free list.
    ///
    /// Components and tags outside the shape are stripped and the versions of
    /// the shape components are bumped, so keys taken during this checkout go
    /// stale. The generation is left alone.
    pub(crate) fn return_to_pool(&mut self, entity: EntityId) -> bool {
        let Some(record) = self.store.record(entity) else {
            return false;
        };
        let Some(pool) = record.pool else {
            return false;
        };
        if record.in_pool {
            return false;
        }

        let index = entity.index();
        let state = &mut self.pools[pool.index()];
        for type_index in 0..self.store.storages.len() {
            let type_id = ComponentTypeId(type_index as u32);
            let storage = self.store.erased_mut(type_id);
            if state.shape.contains(&Token::Component(type_id)) {
                if let Some(meta) = storage.meta_mut(index) {
                    meta.version = meta.version.wrapping_add(1);
                    meta.registered = false;
                }
            } else {
                storage.remove(index);
            }
        }

        if let Some(record) = self.store.record_mut(entity) {
            record.registered = false;
            record.in_pool = true;
            record.components.clear();
            record
                .tags
                .retain(|&tag| state.shape.contains(&Token::Tag(tag)));
        }
        self.store.active.remove(entity);
        self.pending.record_removed(entity);
        state.free.push(entity);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Entity identifiers, allocation, and per-entity bookkeeping.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and an *index* in the low 32 bits. The generation is the
//! entity's version: it is bumped every time the entity is truly destroyed, so
//! a cached handle can be compared against [`World::current_id`] to detect that
//! the entity it referred to is gone.
//!
//! [`World::current_id`]: crate::world::World::current_id

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;
use crate::pool::PoolId;
use crate::token::TagId;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity identifier.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits). This is the entity's version.
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`EntityId`]s with generational tracking.
///
/// Free indices are kept in a FIFO queue so that generations are spread out
/// over time rather than concentrated on a hot index.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    /// Current generation for each index slot.
    generations: Vec<u32>,
    /// Whether the slot is currently alive.
    alive: Vec<bool>,
    /// Free-list of recyclable indices (FIFO queue).
    free_indices: VecDeque<u32>,
    /// Number of alive slots.
    alive_count: usize,
}

impl EntityAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh [`EntityId`].
    ///
    /// If a recycled index is available it will be reused with the generation
    /// bumped at deallocation time; otherwise a brand-new index is created.
    pub fn allocate(&mut self) -> EntityId {
        self.alive_count += 1;
        if let Some(index) = self.free_indices.pop_front() {
            self.alive[index as usize] = true;
            EntityId::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            self.alive.push(true);
            EntityId::new(index, 0)
        }
    }

    /// Deallocate an entity, incrementing the generation for that index so
    /// that any outstanding handles become stale.
    ///
    /// Returns `false` if the entity was already dead or had a stale
    /// generation.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let idx = id.index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_indices.push_back(id.index());
        self.alive_count -= 1;
        true
    }

    /// Returns `true` if `id` refers to a currently alive entity whose
    /// generation matches the allocator's current generation for that index.
    pub fn is_alive(&self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.generations.len() && self.alive[idx] && self.generations[idx] == id.generation()
    }

    /// The live handle currently occupying `index`, if any.
    pub fn current(&self, index: u32) -> Option<EntityId> {
        let idx = index as usize;
        if idx < self.alive.len() && self.alive[idx] {
            Some(EntityId::new(index, self.generations[idx]))
        } else {
            None
        }
    }

    /// Total number of currently alive entities (including parked pool
    /// entities, which keep their slot).
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// Everything the world knows about one allocated entity besides its
/// component payloads.
#[derive(Debug, Clone)]
pub(crate) struct EntityRecord {
    pub id: EntityId,
    /// Class name used for export and class-registry lookup on import.
    pub class: &'static str,
    /// In the active entity list and visible to queries.
    pub registered: bool,
    /// Tags currently applied.
    pub tags: BTreeSet<TagId>,
    /// Component types whose registration has been applied. The storages may
    /// additionally hold components still waiting for their registration.
    pub components: BTreeSet<ComponentTypeId>,
    pub pool: Option<PoolId>,
    /// Parked in its pool's free list.
    pub in_pool: bool,
    pub created: f64,
}

impl EntityRecord {
    pub(crate) fn new(id: EntityId, class: &'static str, created: f64) -> Self {
        Self {
            id,
            class,
            registered: false,
            tags: BTreeSet::new(),
            components: BTreeSet::new(),
            pool: None,
            in_pool: false,
            created,
        }
    }
}

// ---------------------------------------------------------------------------
// EntitySet
// ---------------------------------------------------------------------------

/// An insertion-ordered set of entities with O(1) insert, remove and
/// membership checks.
///
/// Removal swaps the last element into the vacated slot, so iteration order
/// is deterministic but not strictly insertion order once removals happen.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    dense: Vec<EntityId>,
    positions: HashMap<EntityId, usize>,
}

impl EntitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entity`. Returns `false` if it was already present.
    pub fn insert(&mut self, entity: EntityId) -> bool {
        if self.positions.contains_key(&entity) {
            return false;
        }
        self.positions.insert(entity, self.dense.len());
        self.dense.push(entity);
        true
    }

    /// Remove `entity`. Returns `false` if it was not present.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        let Some(pos) = self.positions.remove(&entity) else {
            return false;
        };
        self.dense.swap_remove(pos);
        if let Some(&moved) = self.dense.get(pos) {
            self.positions.insert(moved, pos);
        }
        true
    }

    /// Whether `entity` is in the set.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.positions.contains_key(&entity)
    }

    /// Number of entities in the set.
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Iterate the entities in storage order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.dense.iter().copied()
    }

    /// The entities as a slice, in storage order.
    pub fn as_slice(&self) -> &[EntityId] {
        &self.dense
    }

    /// Remove every entity, keeping the allocations.
    pub fn clear(&mut self) {
        self.dense.clear();
        self.positions.clear();
    }
}

impl<'a> IntoIterator for &'a EntitySet {
    type Item = &'a EntityId;
    type IntoIter = std::slice::Iter<'a, EntityId>;

    fn into_iter(self) -> Self::IntoIter {
        self.dense.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_unique_ids() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..100).map(|_| alloc.allocate()).collect();
        let mut indices: Vec<u32> = ids.iter().map(|id| id.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 100);
        assert_eq!(alloc.alive_count(), 100);
    }

    #[test]
    fn generation_increments_on_recycle() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        assert_eq!(e0.generation(), 0);
        assert!(alloc.deallocate(e0));
        let e1 = alloc.allocate();
        // Same index, higher generation.
        assert_eq!(e1.index(), e0.index());
        assert_eq!(e1.generation(), 1);
        assert_eq!(alloc.current(e0.index()), Some(e1));
    }

    #[test]
    fn stale_id_detection() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        assert!(alloc.is_alive(e0));
        assert!(alloc.deallocate(e0));
        assert!(!alloc.is_alive(e0), "stale ID should not be alive");
        assert_eq!(alloc.current(e0.index()), None);
        let _e1 = alloc.allocate();
        assert!(!alloc.is_alive(e0), "stale ID still not alive after recycle");
    }

    #[test]
    fn double_deallocate_returns_false() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        assert!(alloc.deallocate(e));
        assert!(!alloc.deallocate(e));
        assert_eq!(alloc.alive_count(), 0);
    }

    #[test]
    fn entity_id_roundtrip() {
        let id = EntityId::new(42, 7);
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 7);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
    }

    #[test]
    fn entity_set_swap_remove_keeps_positions() {
        let mut set = EntitySet::new();
        let ids: Vec<EntityId> = (0..5).map(|i| EntityId::new(i, 0)).collect();
        for &id in &ids {
            assert!(set.insert(id));
        }
        assert!(!set.insert(ids[2]));

        assert!(set.remove(ids[1]));
        assert!(!set.remove(ids[1]));
        assert_eq!(set.len(), 4);
        // The last element took the vacated slot and is still removable.
        assert_eq!(set.as_slice()[1], ids[4]);
        assert!(set.remove(ids[4]));
        assert!(set.contains(ids[0]));
        assert!(set.contains(ids[2]));
        assert!(set.contains(ids[3]));
        assert_eq!(set.len(), 3);
    }
}

//! Per-type component storage.
//!
//! Each registered component type owns one [`ComponentStorage`]: a sparse set
//! mapping entity index to a dense slot. The world keeps the storages behind
//! the type-erased [`ErasedStorage`] trait, indexed by
//! [`ComponentTypeId`](crate::component::ComponentTypeId), and downcasts to
//! the concrete storage for typed access. Import, export and pool resets go
//! through the JSON entry points on the trait.

use std::any::Any;

use crate::component::{Component, ComponentMeta};

const EMPTY: u32 = u32::MAX;

/// One stored component: metadata plus payload.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub meta: ComponentMeta,
    pub value: T,
}

/// Sparse-set storage for components of type `T`.
#[derive(Debug)]
pub(crate) struct ComponentStorage<T> {
    /// Entity index -> dense position, `EMPTY` when absent.
    sparse: Vec<u32>,
    dense: Vec<Slot<T>>,
}

impl<T> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
        }
    }
}

impl<T> ComponentStorage<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn position(&self, index: u32) -> Option<usize> {
        match self.sparse.get(index as usize) {
            Some(&pos) if pos != EMPTY => Some(pos as usize),
            _ => None,
        }
    }

    pub(crate) fn get(&self, index: u32) -> Option<&Slot<T>> {
        self.position(index).map(|pos| &self.dense[pos])
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Option<&mut Slot<T>> {
        self.position(index).map(move |pos| &mut self.dense[pos])
    }

    /// Insert a slot for its owner's index.
    ///
    /// # Panics
    ///
    /// Panics if the owner already has a component in this storage.
    pub(crate) fn insert(&mut self, slot: Slot<T>) {
        let index = slot.meta.owner.index() as usize;
        if self.sparse.len() <= index {
            self.sparse.resize(index + 1, EMPTY);
        }
        assert!(
            self.sparse[index] == EMPTY,
            "entity {} already has a component of this type",
            slot.meta.owner
        );
        self.sparse[index] = self.dense.len() as u32;
        self.dense.push(slot);
    }

    pub(crate) fn remove(&mut self, index: u32) -> Option<Slot<T>> {
        let pos = self.position(index)?;
        self.sparse[index as usize] = EMPTY;
        let slot = self.dense.swap_remove(pos);
        if let Some(moved) = self.dense.get(pos) {
            self.sparse[moved.meta.owner.index() as usize] = pos as u32;
        }
        Some(slot)
    }
}

/// Type-erased view over a [`ComponentStorage`].
pub(crate) trait ErasedStorage {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn contains(&self, index: u32) -> bool;
    fn meta(&self, index: u32) -> Option<&ComponentMeta>;
    fn meta_mut(&mut self, index: u32) -> Option<&mut ComponentMeta>;
    /// Drop the component at `index`, returning its metadata.
    fn remove(&mut self, index: u32) -> Option<ComponentMeta>;
    fn to_json(&self, index: u32) -> Option<Result<serde_json::Value, serde_json::Error>>;
    fn insert_json(
        &mut self,
        meta: ComponentMeta,
        value: &serde_json::Value,
    ) -> Result<(), serde_json::Error>;
    /// Replace the payload at `index` in place. Returns `Ok(false)` if there
    /// is no component at `index`.
    fn overwrite_json(
        &mut self,
        index: u32,
        value: &serde_json::Value,
    ) -> Result<bool, serde_json::Error>;
    fn validate_json(&self, value: &serde_json::Value) -> Result<(), serde_json::Error>;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn contains(&self, index: u32) -> bool {
        self.position(index).is_some()
    }

    fn meta(&self, index: u32) -> Option<&ComponentMeta> {
        self.get(index).map(|slot| &slot.meta)
    }

    fn meta_mut(&mut self, index: u32) -> Option<&mut ComponentMeta> {
        self.get_mut(index).map(|slot| &mut slot.meta)
    }

    fn remove(&mut self, index: u32) -> Option<ComponentMeta> {
        ComponentStorage::remove(self, index).map(|slot| slot.meta)
    }

    fn to_json(&self, index: u32) -> Option<Result<serde_json::Value, serde_json::Error>> {
        self.get(index).map(|slot| serde_json::to_value(&slot.value))
    }

    fn insert_json(
        &mut self,
        meta: ComponentMeta,
        value: &serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        let value: T = serde_json::from_value(value.clone())?;
        self.insert(Slot { meta, value });
        Ok(())
    }

    fn overwrite_json(
        &mut self,
        index: u32,
        value: &serde_json::Value,
    ) -> Result<bool, serde_json::Error> {
        let Some(slot) = self.get_mut(index) else {
            return Ok(false);
        };
        slot.value = serde_json::from_value(value.clone())?;
        Ok(true)
    }

    fn validate_json(&self, value: &serde_json::Value) -> Result<(), serde_json::Error> {
        serde_json::from_value::<T>(value.clone()).map(|_| ())
    }
}

//! Priority-ordered systems and the fixed-timestep adapter.
//!
//! A [`System`] is per-tick logic that runs after the query flush. The world
//! keeps its systems sorted by descending [`System::priority`]; systems with
//! equal priority run in registration order. A system can find a sibling by
//! its concrete type through [`World::system`].

use std::any::{Any, TypeId};

use crate::world::World;

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Upcast helper so boxed systems can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-tick logic owned by a [`World`].
pub trait System: AsAny {
    /// Run once per tick, after the query flush.
    fn update(&mut self, world: &mut World);

    /// Higher runs earlier.
    fn priority(&self) -> i32 {
        0
    }

    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Handle of a system registered in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub(crate) u32);

pub(crate) struct SystemEntry {
    pub id: SystemId,
    pub priority: i32,
    pub type_id: TypeId,
    /// `None` while the system is running.
    pub system: Option<Box<dyn System>>,
}

impl World {
    /// Register a system, keeping the list sorted by priority.
    ///
    /// A later system of the same concrete type replaces the earlier one in
    /// the type lookup used by [`system`](Self::system); both keep running.
    pub fn add_system<S: System>(&mut self, system: S) -> SystemId {
        let id = SystemId(self.next_system);
        self.next_system += 1;
        let priority = system.priority();
        let position = self
            .systems
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.systems.len());
        self.systems.insert(
            position,
            SystemEntry {
                id,
                priority,
                type_id: TypeId::of::<S>(),
                system: Some(Box::new(system)),
            },
        );
        self.system_types.insert(TypeId::of::<S>(), id);
        id
    }

    fn system_entry(&self, id: SystemId) -> Option<&SystemEntry> {
        self.systems.iter().find(|entry| entry.id == id)
    }

    /// The registered system of type `S`.
    ///
    /// Returns `None` if no such system exists or if it is the one currently
    /// running.
    pub fn system<S: System>(&self) -> Option<&S> {
        let id = self.system_types.get(&TypeId::of::<S>())?;
        self.system_entry(*id)?
            .system
            .as_ref()?
            .as_ref()
            .as_any()
            .downcast_ref::<S>()
    }

    /// Mutable access to the registered system of type `S`.
    pub fn system_mut<S: System>(&mut self) -> Option<&mut S> {
        let id = *self.system_types.get(&TypeId::of::<S>())?;
        self.systems
            .iter_mut()
            .find(|entry| entry.id == id)?
            .system
            .as_mut()?
            .as_mut()
            .as_any_mut()
            .downcast_mut::<S>()
    }

    /// Unregister a system. Takes effect for the rest of the current tick.
    ///
    /// Returns the system, or `None` if it was not registered or is the one
    /// currently running (it is then dropped once its update returns).
    pub fn remove_system(&mut self, id: SystemId) -> Option<Box<dyn System>> {
        let position = self.systems.iter().position(|entry| entry.id == id)?;
        let entry = self.systems.remove(position);
        if self.system_types.get(&entry.type_id) == Some(&id) {
            self.system_types.remove(&entry.type_id);
        }
        entry.system
    }

    /// Number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Run every system once, in priority order. Returns how many ran.
    pub(crate) fn run_systems(&mut self) -> usize {
        let order: Vec<SystemId> = self.systems.iter().map(|entry| entry.id).collect();
        let mut ran = 0;
        for id in order {
            let Some(mut system) = self
                .systems
                .iter_mut()
                .find(|entry| entry.id == id)
                .and_then(|entry| entry.system.take())
            else {
                continue;
            };
            system.update(self);
            ran += 1;
            if let Some(entry) = self.systems.iter_mut().find(|entry| entry.id == id) {
                entry.system = Some(system);
            }
        }
        ran
    }
}

// ---------------------------------------------------------------------------
// FixedUpdateSystem
// ---------------------------------------------------------------------------

/// Logic that runs at a fixed simulation rate.
pub trait FixedUpdate: 'static {
    /// One fixed step of `step_ms` milliseconds.
    fn fixed_update(&mut self, world: &mut World, step_ms: f64);

    /// Priority of the wrapping system.
    fn priority(&self) -> i32 {
        0
    }
}

/// Runs a [`FixedUpdate`] a whole number of times per tick, carrying the
/// fractional remainder forward.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// struct Counter(u32);
///
/// impl FixedUpdate for Counter {
///     fn fixed_update(&mut self, _world: &mut World, _step_ms: f64) {
///         self.0 += 1;
///     }
/// }
///
/// let mut world = World::new();
/// world.add_system(FixedUpdateSystem::new(10.0, Counter(0)));
/// world.tick(25.0);
/// let system = world.system::<FixedUpdateSystem<Counter>>().unwrap();
/// assert_eq!(system.inner().0, 2);
/// assert!((system.leftover() - 5.0).abs() < 1e-9);
/// ```
#[derive(Debug)]
pub struct FixedUpdateSystem<S> {
    inner: S,
    step_ms: f64,
    leftover: f64,
    total_steps: u64,
}

impl<S: FixedUpdate> FixedUpdateSystem<S> {
    /// Wrap `inner`, stepping it every `step_ms` milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if `step_ms` is not positive and finite.
    pub fn new(step_ms: f64, inner: S) -> Self {
        assert!(
            step_ms > 0.0 && step_ms.is_finite(),
            "fixed step must be positive and finite, got {step_ms}"
        );
        Self {
            inner,
            step_ms,
            leftover: 0.0,
            total_steps: 0,
        }
    }

    /// Milliseconds between fixed updates.
    pub fn step_ms(&self) -> f64 {
        self.step_ms
    }

    /// Accumulated time not yet consumed by a step.
    pub fn leftover(&self) -> f64 {
        self.leftover
    }

    /// Fixed steps run so far.
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: FixedUpdate> System for FixedUpdateSystem<S> {
    fn update(&mut self, world: &mut World) {
        self.leftover += world.delta_time();
        let steps = (self.leftover / self.step_ms).floor().max(0.0);
        for _ in 0..steps as u64 {
            self.inner.fixed_update(world, self.step_ms);
        }
        self.leftover -= steps * self.step_ms;
        self.total_steps += steps as u64;
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<S>()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

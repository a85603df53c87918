//! Tessera ECS -- incremental-query Entity Component System with deferred
//! mutation and entity pooling.
//!
//! Components live in one sparse-set storage per registered type. Queries
//! over component types and string tags are maintained incrementally: each
//! tick the world hands every query the tokens that changed per entity, and a
//! query only re-evaluates an entity when one of those tokens is in its
//! subscription set. Structural mutations are deferred to a fixed point at the
//! start of the next tick, so they are safe to request while iterating a
//! query's matches.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! let position = world.register_component::<Position>("position");
//! let moving = world.create_query(QueryFilter::new().all([position]));
//!
//! let entity = world.spawn();
//! world.add_component(entity, Position { x: 0.0, y: 0.0 }).unwrap();
//! assert!(world.query(moving).matches().is_empty());
//!
//! world.tick(16.0);
//! assert!(world.query(moving).matches().contains(entity));
//! ```

#![deny(unsafe_code)]

pub mod command;
pub mod component;
pub mod entity;
pub mod pool;
pub mod query;
pub mod routine;
pub mod snapshot;
mod storage;
pub mod store;
pub mod system;
pub mod token;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation, never allocated, or
    /// parked in its pool).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// A component name was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// An export names a class the class registry does not know.
    #[error("entity class '{name}' not registered. Registered classes: [{registered}]")]
    UnknownClass { name: String, registered: String },

    /// Deserialization of a component value failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    /// Serialization of a component value failed.
    #[error("failed to serialize component '{component}': {details}")]
    ComponentSerialization { component: String, details: String },

    /// The pool id does not belong to this world.
    #[error("unknown entity pool {0:?}")]
    UnknownPool(pool::PoolId),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::command::{ApplyReport, Change, Command};
    pub use crate::component::{
        Component, ComponentId, ComponentKey, ComponentMeta, ComponentRegistry, ComponentTypeId,
    };
    pub use crate::entity::{EntityId, EntitySet};
    pub use crate::pool::{EntityPool, PoolId, PoolSpec};
    pub use crate::query::{Query, QueryFilter, QueryId};
    pub use crate::routine::{Delay, Routine, RoutineId, Step};
    pub use crate::snapshot::{spawn_from_export, ClassRegistry, ComponentExport, EntityExport};
    pub use crate::store::EntityView;
    pub use crate::system::{FixedUpdate, FixedUpdateSystem, System, SystemId};
    pub use crate::token::{TagId, Token};
    pub use crate::world::{TickReport, World, DEFAULT_CLASS};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

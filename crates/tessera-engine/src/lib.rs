//! Tessera Engine -- frame driver, configuration, logging and save files
//! around the [`tessera_ecs`] world.
//!
//! The ECS core never reads a clock. This crate owns the [`World`] in a
//! [`FrameLoop`](frame::FrameLoop) that injects time into
//! [`World::tick`](tessera_ecs::world::World::tick), loads an
//! [`EngineConfig`](config::EngineConfig) from JSON, installs a `tracing`
//! subscriber and writes hash-verified [`SaveFile`](save::SaveFile)s.
//!
//! # Quick Start
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! struct Count(u32);
//!
//! impl System for Count {
//!     fn update(&mut self, _world: &mut World) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let mut world = World::new();
//! world.add_system(Count(0));
//!
//! let mut frames = FrameLoop::new(world, EngineConfig::default().headless());
//! frames.run_frames(100);
//! assert_eq!(frames.frame(), 100);
//! assert_eq!(frames.world().system::<Count>().unwrap().0, 100);
//! ```
//!
//! [`World`]: tessera_ecs::world::World

#![deny(unsafe_code)]

pub mod config;
pub mod frame;
pub mod logging;
pub mod save;

/// Re-export the ECS crate for convenience.
pub use tessera_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_ecs::prelude::*;

    pub use crate::config::EngineConfig;
    pub use crate::frame::{FrameDiagnostics, FrameLoop};
    pub use crate::save::{SaveError, SaveFile};
}

//! Save files with a BLAKE3 content hash.
//!
//! A [`SaveFile`] is the world's entity export plus the frame metadata needed
//! to resume, sealed with a BLAKE3 hex digest of everything else in the file.
//! The digest is checked before a save is applied, so a truncated or
//! hand-edited file is rejected instead of half-loaded.
//!
//! # Usage
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let mut world = World::new();
//! world.register_component::<u32>("score");
//! let entity = world.spawn();
//! world.add_component(entity, 7u32).unwrap();
//!
//! let mut frames = FrameLoop::new(world, EngineConfig::default());
//! frames.run_frames(10);
//!
//! let save = frames.capture().unwrap();
//! assert_eq!(save.frame, 10);
//! assert_eq!(save.hash.len(), 64);
//!
//! frames.run_frames(10);
//! frames.restore(&save, &ClassRegistry::with_defaults()).unwrap();
//! assert_eq!(frames.frame(), 10);
//! ```
//!
//! # What is not saved
//!
//! - **Systems and routines**: code, not data. They stay registered on the
//!   loop that restores the save.
//! - **World time**: the world clock only moves forward. A restore continues
//!   from the current world time; `time_ms` records when the save was taken.
//! - **Entity handles**: restored entities get fresh handles.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tessera_ecs::entity::EntityId;
use tessera_ecs::snapshot::{ClassRegistry, EntityExport};
use tracing::{debug, info};

use crate::frame::FrameLoop;

// ---------------------------------------------------------------------------
// SaveFile
// ---------------------------------------------------------------------------

/// A serializable save of a [`FrameLoop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    /// Frames run when the save was captured.
    pub frame: u64,
    /// World time (ms) when the save was captured.
    pub time_ms: f64,
    /// Every registered entity.
    pub entities: Vec<EntityExport>,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the fields above.
    pub hash: String,
}

/// Save verification failures.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("save file hash mismatch: file says {expected}, contents hash to {actual}")]
    HashMismatch { expected: String, actual: String },
}

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

fn compute_hash(frame: u64, time_ms: f64, entities: &[EntityExport]) -> anyhow::Result<String> {
    #[derive(Serialize)]
    struct HashableSave<'a> {
        frame: u64,
        time_ms: f64,
        entities: &'a [EntityExport],
    }

    let bytes = serde_json::to_vec(&HashableSave {
        frame,
        time_ms,
        entities,
    })
    .context("failed to serialize save contents")?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

impl SaveFile {
    /// Recompute the digest and compare it against `hash`.
    pub fn verify(&self) -> anyhow::Result<()> {
        let actual = compute_hash(self.frame, self.time_ms, &self.entities)?;
        if actual != self.hash {
            return Err(SaveError::HashMismatch {
                expected: self.hash.clone(),
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Parse a save from JSON text and verify it.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let save: Self = serde_json::from_str(json).context("failed to parse save file")?;
        save.verify()?;
        Ok(save)
    }
}

// ---------------------------------------------------------------------------
// FrameLoop save/restore impl
// ---------------------------------------------------------------------------

impl FrameLoop {
    /// Capture the current state as a [`SaveFile`].
    pub fn capture(&self) -> anyhow::Result<SaveFile> {
        let entities = self
            .world()
            .save_entities()
            .context("failed to export entities")?;
        let frame = self.frame();
        let time_ms = self.world().time();
        let hash = compute_hash(frame, time_ms, &entities)?;
        Ok(SaveFile {
            frame,
            time_ms,
            entities,
            hash,
        })
    }

    /// Verify `save` and replace the world's entities with its contents.
    ///
    /// On success the frame counter is set to the saved frame and fixed-rate
    /// stepping restarts from the current world time. Returns the restored
    /// entities in save order; they join queries at the next frame.
    pub fn restore(
        &mut self,
        save: &SaveFile,
        classes: &ClassRegistry,
    ) -> anyhow::Result<Vec<EntityId>> {
        save.verify()?;
        let entities = self
            .world_mut()
            .load_entities(&save.entities, classes)
            .context("failed to restore entities")?;
        self.rebase(save.frame);
        debug!(frame = save.frame, entities = entities.len(), "restored save");
        Ok(entities)
    }

    /// Capture and write a pretty-printed JSON save to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<SaveFile> {
        let path = path.as_ref();
        let save = self.capture()?;
        let json = serde_json::to_string_pretty(&save).context("failed to serialize save file")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write save file {}", path.display()))?;
        info!(path = %path.display(), frame = save.frame, "wrote save file");
        Ok(save)
    }

    /// Read, verify and restore a save written by [`save`](Self::save).
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        classes: &ClassRegistry,
    ) -> anyhow::Result<Vec<EntityId>> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read save file {}", path.display()))?;
        let save = SaveFile::from_json_str(&json)
            .with_context(|| format!("in {}", path.display()))?;
        let entities = self.restore(&save, classes)?;
        info!(path = %path.display(), frame = save.frame, "loaded save file");
        Ok(entities)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tessera_ecs::world::World;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Score(u32);

    fn frames() -> FrameLoop {
        let mut world = World::new();
        world.register_component::<Score>("score");
        let entity = world.spawn();
        world.add_component(entity, Score(3)).unwrap();
        let config = EngineConfig {
            frame_ms: 10.0,
            ..EngineConfig::default()
        };
        FrameLoop::new(world, config.headless())
    }

    #[test]
    fn capture_is_deterministic() {
        let mut a = frames();
        let mut b = frames();
        a.run_frames(5);
        b.run_frames(5);
        assert_eq!(a.capture().unwrap().hash, b.capture().unwrap().hash);
    }

    #[test]
    fn tampered_save_is_rejected() {
        let mut frames = frames();
        frames.run_frames(2);
        let mut save = frames.capture().unwrap();
        save.entities[0].components[0].data = serde_json::json!(99);

        let err = frames
            .restore(&save, &ClassRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SaveError>(),
            Some(SaveError::HashMismatch { .. })
        ));
        // Nothing was replaced.
        assert_eq!(frames.frame(), 2);
    }

    #[test]
    fn json_text_round_trips_with_a_valid_hash() {
        let mut frames = frames();
        frames.run_frames(3);
        let save = frames.capture().unwrap();
        let text = serde_json::to_string(&save).unwrap();
        assert_eq!(SaveFile::from_json_str(&text).unwrap(), save);
    }
}

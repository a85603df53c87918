//! Frame driver around [`World::tick`].
//!
//! The [`FrameLoop`] owns a [`World`] and injects time into it. Each frame
//! calls [`World::tick`] once, which drains deferred commands, flushes query
//! membership, runs systems and steps routines.
//!
//! Two ways to drive it:
//!
//! - [`FrameLoop::step`] advances simulated time by exactly `frame_ms`.
//!   Simulated time is computed as `origin + frames * frame_ms` rather than
//!   accumulated, so long runs do not drift.
//! - [`FrameLoop::step_at`] ticks at an externally measured time. The injected
//!   delta is clamped to `[0, max_frame_ms]` so a stall cannot flood
//!   fixed-update systems with catch-up steps.
//!
//! # Example
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let mut frames = FrameLoop::new(World::new(), EngineConfig::default());
//! frames.run_frames(60);
//! assert_eq!(frames.frame(), 60);
//! assert!((frames.world().time() - 1000.0).abs() < 1e-9);
//! ```

use std::time::{Duration, Instant};

use tessera_ecs::world::{TickReport, World};
use tracing::debug;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// What the last frame did and how long it took.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// Frame counter after the frame.
    pub frame: u64,
    /// Wall-clock time spent inside [`World::tick`].
    pub wall_time: Duration,
    /// Whether the injected delta was clamped to `max_frame_ms`.
    pub clamped: bool,
    pub report: TickReport,
}

// ---------------------------------------------------------------------------
// FrameLoop
// ---------------------------------------------------------------------------

/// Owns a [`World`] and advances it one frame at a time.
#[derive(Debug)]
pub struct FrameLoop {
    world: World,
    config: EngineConfig,
    /// Frames run so far, by either driver.
    frame: u64,
    /// World time the fixed-rate driver counts from.
    origin_ms: f64,
    /// Fixed-rate frames since `origin_ms` was set.
    fixed_frames: u64,
    last_diagnostics: FrameDiagnostics,
}

impl FrameLoop {
    /// Wrap `world`. Fixed-rate stepping starts from the world's current
    /// time.
    ///
    /// # Panics
    ///
    /// Panics if `config.frame_ms` is not positive and finite, or if
    /// `config.max_frame_ms` is smaller than it.
    pub fn new(world: World, config: EngineConfig) -> Self {
        assert!(
            config.frame_ms > 0.0 && config.frame_ms.is_finite(),
            "frame_ms must be positive and finite, got {}",
            config.frame_ms
        );
        assert!(
            config.max_frame_ms >= config.frame_ms,
            "max_frame_ms ({}) must be at least frame_ms ({})",
            config.max_frame_ms,
            config.frame_ms
        );
        let origin_ms = world.time();
        Self {
            world,
            config,
            frame: 0,
            origin_ms,
            fixed_frames: 0,
            last_diagnostics: FrameDiagnostics::default(),
        }
    }

    /// Advance simulated time by one `frame_ms` and tick.
    pub fn step(&mut self) -> TickReport {
        self.fixed_frames += 1;
        let now = self.origin_ms + self.fixed_frames as f64 * self.config.frame_ms;
        self.run_tick(now, false)
    }

    /// Tick at the externally measured time `now_ms`.
    ///
    /// The delta handed to the world is clamped to `[0, max_frame_ms]`.
    /// Subsequent [`step`](Self::step) calls continue from the resulting
    /// world time.
    pub fn step_at(&mut self, now_ms: f64) -> TickReport {
        let previous = self.world.time();
        let delta = (now_ms - previous).clamp(0.0, self.config.max_frame_ms);
        let clamped = delta != now_ms - previous;
        if clamped {
            debug!(
                requested = now_ms - previous,
                injected = delta,
                "clamped frame delta"
            );
        }
        let report = self.run_tick(previous + delta, clamped);
        self.origin_ms = self.world.time();
        self.fixed_frames = 0;
        report
    }

    /// Run `count` fixed-rate frames. Returns the number of deferred
    /// commands applied across them.
    pub fn run_frames(&mut self, count: u64) -> u64 {
        let mut applied = 0u64;
        for _ in 0..count {
            applied += self.step().commands.applied as u64;
        }
        applied
    }

    fn run_tick(&mut self, now_ms: f64, clamped: bool) -> TickReport {
        let start = Instant::now();
        let report = self.world.tick(now_ms);
        self.frame += 1;
        self.last_diagnostics = FrameDiagnostics {
            frame: self.frame,
            wall_time: start.elapsed(),
            clamped,
            report,
        };
        report
    }

    /// Restart fixed-rate stepping from the world's current time, with the
    /// frame counter set to `frame`.
    pub(crate) fn rebase(&mut self, frame: u64) {
        self.frame = frame;
        self.origin_ms = self.world.time();
        self.fixed_frames = 0;
    }

    // -- accessors ----------------------------------------------------------

    /// Frames run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for setup and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Give the world back.
    pub fn into_world(self) -> World {
        self.world
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_headless(&self) -> bool {
        self.config.headless
    }

    /// Diagnostics from the last frame.
    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Engine configuration.
//!
//! [`EngineConfig`] is plain data, deserializable from JSON. Every field has a
//! default, so an empty object (`{}`) is a valid configuration:
//!
//! ```
//! use tessera_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "headless": true }"#).unwrap();
//! assert!(config.headless);
//! assert_eq!(config.log_filter, "info");
//! assert!((config.frame_ms - 1000.0 / 60.0).abs() < f64::EPSILON);
//! ```

use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

fn default_frame_ms() -> f64 {
    1000.0 / 60.0
}

fn default_log_filter() -> String {
    "info".to_owned()
}

fn default_max_frame_ms() -> f64 {
    250.0
}

/// Configuration for a [`FrameLoop`](crate::frame::FrameLoop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Simulated milliseconds per frame. Must be positive and finite.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: f64,
    /// Headless mode: no presentation, step as fast as possible.
    #[serde(default)]
    pub headless: bool,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Upper bound on the delta a single externally timed frame may inject.
    #[serde(default = "default_max_frame_ms")]
    pub max_frame_ms: f64,
}

impl Default for EngineConfig {
    /// 60 Hz, windowed, `info` logging, 250 ms frame clamp.
    fn default() -> Self {
        Self {
            frame_ms: default_frame_ms(),
            headless: false,
            log_filter: default_log_filter(),
            max_frame_ms: default_max_frame_ms(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine configuration {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in {}", path.display()))
    }

    /// Check the numeric fields.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.frame_ms > 0.0 && self.frame_ms.is_finite(),
            "frame_ms must be positive and finite, got {}",
            self.frame_ms
        );
        ensure!(
            self.max_frame_ms >= self.frame_ms,
            "max_frame_ms ({}) must be at least frame_ms ({})",
            self.max_frame_ms,
            self.frame_ms
        );
        Ok(())
    }

    /// A headless copy of this configuration.
    pub fn headless(mut self) -> Self {
        self.headless = true;
        self
    }
}

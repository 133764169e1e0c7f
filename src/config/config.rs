//! # Session Configuration
//!
//! Static settings for one flipbook session. This is the common interface
//! between the CLI, JSON configuration files and the library.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Range | Description |
//! |-----------|------|-------|-------------|
//! | `resource_dir` | path | any | Model resources handed to the pipeline |
//! | `compute_units` | enum | see `ComputeUnits` | Compute backend selection |
//! | `page_count` | `usize` | ≥ 1 | Pages in the carousel |
//! | `resolution` | `Resolution` | non-zero | Page buffer size |
//! | `params` | `GenerationParams` | see type | Initial generation parameters |
//! | `speed` | `f32` | 0.1-8.0 | Initial flip speed |
//! | `bypass` | `bool` | | Replace inference with a delay and a copy |
//! | `bypass_delay_ms` | `u64` | | Length of the bypass delay |
//!
//! ## Examples
//!
//! ```rust
//! use flipbook::config::FlipbookConfig;
//!
//! let config = FlipbookConfig::from_json_str(r#"{ "page_count": 4, "bypass": true }"#).unwrap();
//! assert_eq!(config.page_count, 4);
//! assert_eq!(config.resolution.width, 512);
//! assert!(config.validate().is_ok());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::params::{GenerationParams, LiveSettings};
use crate::core::page::Resolution;
use crate::core::timing::FlipSpeed;
use crate::error::{FlipbookError, FlipbookResult};
use crate::pipeline::ComputeUnits;

/// Pages in the carousel unless configured otherwise.
pub const DEFAULT_PAGE_COUNT: usize = 8;

/// Configuration for a flipbook session.
///
/// Missing fields in a JSON file fall back to [`FlipbookConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipbookConfig {
    /// Directory holding the pipeline's model resources.
    pub resource_dir: PathBuf,

    pub compute_units: ComputeUnits,

    /// Capacity of the page pool. Fixed for the session's lifetime.
    pub page_count: usize,

    /// Resolution of every page buffer.
    pub resolution: Resolution,

    /// Initial generation parameters; they can be changed while running.
    pub params: GenerationParams,

    /// Initial flip speed; it can be changed while running.
    pub speed: f32,

    /// Skip the pipeline and substitute a fixed delay plus a direct copy of
    /// the source image. For exercising timing without a model.
    pub bypass: bool,

    /// Delay substituted for inference in bypass mode.
    pub bypass_delay_ms: u64,
}

impl Default for FlipbookConfig {
    /// Defaults: 8 pages of 512x512, speed 1, bypass off with a 1.5 s delay,
    /// resources under `StableDiffusion`.
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("StableDiffusion"),
            compute_units: ComputeUnits::default(),
            page_count: DEFAULT_PAGE_COUNT,
            resolution: Resolution::default(),
            params: GenerationParams::default(),
            speed: 1.0,
            bypass: false,
            bypass_delay_ms: 1500,
        }
    }
}

impl FlipbookConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> FlipbookResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            FlipbookError::external("serde_json", e).with_operation("parse configuration")
        })
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> FlipbookResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FlipbookError::io_at("read configuration", path.display().to_string(), e))?;
        Self::from_json_str(&text).map_err(|e| e.with_context(path.display().to_string()))
    }

    pub fn bypass_delay(&self) -> Duration {
        Duration::from_millis(self.bypass_delay_ms)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> FlipbookResult<()> {
        if self.page_count == 0 {
            return Err(FlipbookError::config(
                "page_count",
                "0",
                "the carousel needs at least one page",
            ));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(FlipbookError::config(
                "resolution",
                self.resolution.to_string(),
                "both dimensions must be non-zero",
            ));
        }
        self.params.validate()?;
        FlipSpeed::new(self.speed)?;
        Ok(())
    }

    /// Initial value of the live settings channel.
    pub fn live_settings(&self) -> FlipbookResult<LiveSettings> {
        Ok(LiveSettings {
            params: self.params.clone(),
            speed: FlipSpeed::new(self.speed)?,
        })
    }
}

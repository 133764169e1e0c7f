//! # Pipeline Module
//!
//! Boundary with the generative image pipeline. The orchestration core never
//! looks inside a pipeline: it initializes it once, applies parameters before
//! every cycle, asks it to render a source frame into a page buffer, and
//! disposes of it when the loop ends.

pub mod http;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::config::params::GenerationParams;
use crate::core::cancel::CancellationSignal;
use crate::core::page::PageBuffer;
use crate::error::FlipbookResult;

/// Compute backend a pipeline should bind to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ComputeUnits {
    CpuOnly,
    CpuAndGpu,
    CpuAndNeuralEngine,
    #[default]
    All,
}

impl fmt::Display for ComputeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputeUnits::CpuOnly => "cpu-only",
            ComputeUnits::CpuAndGpu => "cpu-and-gpu",
            ComputeUnits::CpuAndNeuralEngine => "cpu-and-neural-engine",
            ComputeUnits::All => "all",
        };
        f.write_str(name)
    }
}

/// Generative img2img pipeline.
///
/// Implementations that observe `cancel` should return
/// [`FlipbookError::Cancelled`](crate::error::FlipbookError::Cancelled) when
/// they unwind because of it; any other error ends the generation loop.
#[async_trait]
pub trait Pipeline: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Load resources and bind to a compute backend. Called once, before any
    /// other method except `dispose`.
    async fn initialize(
        &mut self,
        resource_dir: &Path,
        compute_units: ComputeUnits,
    ) -> FlipbookResult<()>;

    /// Set the parameters used by subsequent `run` calls.
    fn apply(&mut self, params: &GenerationParams);

    /// Render `source` into `destination` in place.
    async fn run(
        &mut self,
        source: &RgbaImage,
        destination: &mut PageBuffer,
        cancel: &CancellationSignal,
    ) -> FlipbookResult<()>;

    /// Release native resources. Must tolerate being called on a pipeline
    /// whose initialization failed or was cancelled.
    fn dispose(&mut self);
}

//! # Flipbook
//!
//! Orchestration core for a generative flipbook: a fixed carousel of pages,
//! each repeatedly refilled by an img2img pipeline and then flipped into view.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `core`: page buffers, the page pool, cancellation and process timing
//! - `generation`: the single task that renders and flips pages
//! - `pipeline`: the generative model boundary and an HTTP img2img client
//! - `display`: the renderer boundary plus recording and PNG backends
//! - `source`: frames fed into the pipeline
//! - `config`: static configuration and live generation settings
//! - `session`: builder, start and ordered teardown
//!
//! ## Features
//!
//! - **Bounded memory**: the carousel never holds more than `page_count` pages
//! - **Oldest-first reuse**: a page is rewritten only after every other page has been
//! - **Live settings**: prompt, strength, steps, seed, guidance and speed change between cycles
//! - **Guaranteed disposal**: the pipeline is released once on every exit path
//! - **Bypass mode**: a fixed delay and a copy stand in for inference
//!
//! ## Example
//!
//! ```rust,no_run
//! use flipbook::{FlipbookConfig, FlipbookSession, HttpPipeline};
//! use flipbook::display::snapshot::SnapshotDisplay;
//! use flipbook::source::StillImageSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlipbookConfig::default();
//! let running = FlipbookSession::builder()
//!     .with_pipeline(HttpPipeline::new("http://127.0.0.1:7860")?)
//!     .with_image_source(StillImageSource::open("input.png", config.resolution)?)
//!     .with_display(SnapshotDisplay::new("pages")?)
//!     .with_config(config)
//!     .build()?
//!     .start();
//!
//! tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! let report = running.shutdown().await?;
//! println!("{} pages generated", report.cycles_completed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod display;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod session;
pub mod source;

/// Re-export error types for convenience
pub use error::{FlipbookError, FlipbookResult, HasRecoverySuggestion, HasSeverity};

pub use config::{FlipbookConfig, GenerationParams, SettingsHandle};
pub use generation::{LoopReport, LoopState};
pub use pipeline::ComputeUnits;
pub use pipeline::http::HttpPipeline;
pub use session::{FlipbookSession, RunningFlipbook};

//! # Flipbook Session
//!
//! The surrounding component that owns the carousel: it assembles the
//! generation loop from a configuration and its collaborators, spawns it, and
//! performs the ordered teardown.
//!
//! ## Teardown Order
//!
//! 1. cancel the loop
//! 2. wait for the task to finish (the loop disposes its pipeline)
//! 3. drain the page pool, destroying every page exactly once
//!
//! Pages are only destroyed after step 2, so no buffer is released while a
//! render is writing into it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use flipbook::config::FlipbookConfig;
//! use flipbook::display::recording::RecordingDisplay;
//! use flipbook::session::FlipbookSession;
//! use flipbook::source::TestPatternSource;
//!
//! # async fn demo() -> flipbook::error::FlipbookResult<()> {
//! let config = FlipbookConfig { bypass: true, ..FlipbookConfig::default() };
//! let running = FlipbookSession::builder()
//!     .with_image_source(TestPatternSource::new(config.resolution))
//!     .with_display(RecordingDisplay::new())
//!     .with_config(config)
//!     .build()?
//!     .start();
//!
//! running.settings().set_prompt("katsushika hokusai");
//! let report = running.shutdown().await?;
//! println!("{} pages flipped", report.cycles_completed);
//! # Ok(())
//! # }
//! ```

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::FlipbookConfig;
use crate::config::params::SettingsHandle;
use crate::core::cancel::CancellationSource;
use crate::display::{DisplayBackend, DisplayParent};
use crate::error::{FlipbookError, FlipbookResult};
use crate::generation::{FinishedLoop, GenerationLoop, LoopComponents, LoopReport, LoopState};
use crate::pipeline::Pipeline;
use crate::source::ImageSource;

/// A configured, not yet started flipbook.
pub struct FlipbookSession {
    generation: GenerationLoop,
    settings: SettingsHandle,
    cancel: CancellationSource,
    state: watch::Receiver<LoopState>,
}

impl FlipbookSession {
    /// Create a new session using the builder pattern.
    pub fn builder() -> FlipbookSessionBuilder {
        FlipbookSessionBuilder::new()
    }

    /// Handle for changing parameters and speed, before or after starting.
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Spawn the generation loop on the current tokio runtime.
    pub fn start(self) -> RunningFlipbook {
        let FlipbookSession {
            generation,
            settings,
            cancel,
            state,
        } = self;

        info!("starting flipbook");
        RunningFlipbook {
            task: Some(tokio::spawn(generation.run())),
            settings,
            cancel,
            state,
        }
    }
}

/// Builder for [`FlipbookSession`].
pub struct FlipbookSessionBuilder {
    config: FlipbookConfig,
    pipeline: Option<Box<dyn Pipeline>>,
    source: Option<Box<dyn ImageSource>>,
    display: Option<Box<dyn DisplayBackend>>,
    parent: DisplayParent,
}

impl FlipbookSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: FlipbookConfig::default(),
            pipeline: None,
            source: None,
            display: None,
            parent: DisplayParent::default(),
        }
    }

    pub fn with_config(mut self, config: FlipbookConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the generative pipeline. Not needed in bypass mode.
    pub fn with_pipeline<P: Pipeline + 'static>(mut self, pipeline: P) -> Self {
        self.pipeline = Some(Box::new(pipeline));
        self
    }

    pub fn with_image_source<S: ImageSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_display<D: DisplayBackend + 'static>(mut self, display: D) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    /// Parent under which page display objects are created.
    pub fn with_parent(mut self, parent: DisplayParent) -> Self {
        self.parent = parent;
        self
    }

    /// Validate the configuration and assemble the session.
    pub fn build(self) -> FlipbookResult<FlipbookSession> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| {
            FlipbookError::config("image_source", "none", "no image source specified")
        })?;
        let display = self
            .display
            .ok_or_else(|| FlipbookError::config("display", "none", "no display specified"))?;

        let settings = SettingsHandle::new(self.config.live_settings()?);
        let cancel = CancellationSource::new();
        let (state_tx, state_rx) = watch::channel(LoopState::NotStarted);

        let generation = GenerationLoop::new(
            &self.config,
            LoopComponents {
                pipeline: self.pipeline,
                source,
                display,
                parent: self.parent,
            },
            settings.subscribe(),
            cancel.signal(),
            state_tx,
        )?;

        debug!(
            "built flipbook session: {} pages at {}",
            self.config.page_count, self.config.resolution
        );

        Ok(FlipbookSession {
            generation,
            settings,
            cancel,
            state: state_rx,
        })
    }
}

impl Default for FlipbookSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A started flipbook. Dropping it cancels the loop without waiting; call
/// [`shutdown`](Self::shutdown) to also destroy the pages.
pub struct RunningFlipbook {
    task: Option<JoinHandle<FinishedLoop>>,
    settings: SettingsHandle,
    cancel: CancellationSource,
    state: watch::Receiver<LoopState>,
}

impl RunningFlipbook {
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Receiver following every state transition.
    pub fn state_watch(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Request cancellation without waiting for it to take effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the loop has stopped on its own or been cancelled.
    pub async fn stopped(&self) -> LoopState {
        let mut state = self.state.clone();
        match state.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives in the task; gone means the task is gone.
            Err(_) => LoopState::Disposed,
        }
    }

    /// Cancel the loop, wait for it to stop and destroy every page.
    ///
    /// Returns the loop's report, or the error that stopped it if it failed
    /// before cancellation arrived.
    pub async fn shutdown(mut self) -> FlipbookResult<LoopReport> {
        self.cancel.cancel();
        self.finish().await
    }

    /// Wait for the loop to stop by itself, then destroy every page.
    pub async fn join(mut self) -> FlipbookResult<LoopReport> {
        self.finish().await
    }

    async fn finish(&mut self) -> FlipbookResult<LoopReport> {
        let task = self.task.take().ok_or_else(|| {
            FlipbookError::state("finished", "join", "the generation task was already joined")
        })?;

        let finished = task.await.map_err(|e| {
            FlipbookError::external("tokio", e).with_operation("join generation task")
        })?;
        let report = finished.teardown()?;
        info!(
            "flipbook stopped after {} cycles, {} pages destroyed",
            report.cycles_completed, report.pages_destroyed
        );
        Ok(report)
    }
}

impl Drop for RunningFlipbook {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

//! # Generation Loop
//!
//! The single asynchronous task that drives the carousel. One cycle:
//!
//! 1. snapshot the live settings and apply them to the pipeline
//! 2. acquire a page (allocate below capacity, otherwise reuse the oldest) and
//!    put it straight back at the tail of the pool
//! 3. render the current source frame into the page's buffer
//! 4. start the page's flip at the current process time
//!
//! Cycles run strictly one after another. Cancellation is observed at the
//! pipeline initialization await, at every render await, and between cycles;
//! it ends the loop silently. Any other failure ends the loop and is handed
//! back to the owner. Either way the pipeline is disposed exactly once before
//! [`GenerationLoop::run`] returns, and the page pool is returned intact so
//! the owner can destroy it after nothing writes into it anymore.
//!
//! ```text
//! NotStarted ─▶ Initializing ─▶ Running ─┬─▶ Cancelled ─┬─▶ Disposed
//!     │              │           ▲  │    │              │
//!     │              │           └──┘    └─▶ Failed ────┘
//!     └──────────────┴─────────────────────▶ (cancel / init failure)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::FlipbookConfig;
use crate::config::params::LiveSettings;
use crate::core::cancel::CancellationSignal;
use crate::core::page::{Page, PageBuffer, Resolution};
use crate::core::page_pool::{Acquired, PagePool};
use crate::core::timing::ProcessClock;
use crate::display::{DisplayBackend, DisplayParent};
use crate::error::{FlipbookError, FlipbookResult, classify};
use crate::pipeline::{ComputeUnits, Pipeline};
use crate::source::ImageSource;

/// Lifecycle of the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    NotStarted,
    Initializing,
    Running,
    Cancelled,
    Failed,
    Disposed,
}

impl LoopState {
    /// The loop has stopped producing pages.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopState::Cancelled | LoopState::Failed | LoopState::Disposed
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::NotStarted => "not-started",
            LoopState::Initializing => "initializing",
            LoopState::Running => "running",
            LoopState::Cancelled => "cancelled",
            LoopState::Failed => "failed",
            LoopState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// How a suspension point resolved when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Completed,
    Cancelled,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Failed,
}

/// Counters collected over the loop's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    /// Cycles that ended with a flip.
    pub cycles_completed: u64,
    pub pages_allocated: usize,
    /// Acquisitions served by rewriting an existing page.
    pub pages_reused: u64,
    /// Pages destroyed at teardown.
    pub pages_destroyed: usize,
    pub exit: Option<LoopExit>,
}

impl LoopReport {
    fn new() -> Self {
        Self {
            cycles_completed: 0,
            pages_allocated: 0,
            pages_reused: 0,
            pages_destroyed: 0,
            exit: None,
        }
    }
}

/// External collaborators the loop drives.
pub struct LoopComponents {
    /// Required unless the configuration enables bypass mode.
    pub pipeline: Option<Box<dyn Pipeline>>,
    pub source: Box<dyn ImageSource>,
    pub display: Box<dyn DisplayBackend>,
    pub parent: DisplayParent,
}

/// Owns the pipeline and disposes of it exactly once.
///
/// Disposal normally happens through [`PipelineSlot::dispose`] before the loop
/// reports back; `Drop` covers a loop future that is dropped mid-await.
struct PipelineSlot {
    pipeline: Option<Box<dyn Pipeline>>,
    engaged: bool,
}

impl PipelineSlot {
    fn new(pipeline: Option<Box<dyn Pipeline>>) -> Self {
        Self {
            pipeline,
            engaged: false,
        }
    }

    /// Borrow the pipeline and mark it as needing disposal.
    fn engage(&mut self) -> Option<&mut (dyn Pipeline + 'static)> {
        let pipeline = self.pipeline.as_deref_mut()?;
        self.engaged = true;
        Some(pipeline)
    }

    fn get_mut(&mut self) -> Option<&mut (dyn Pipeline + 'static)> {
        self.pipeline.as_deref_mut()
    }

    fn dispose(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            if self.engaged {
                debug!("disposing pipeline '{}'", pipeline.name());
                pipeline.dispose();
            }
        }
    }
}

impl Drop for PipelineSlot {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// What is left once the loop has stopped.
pub struct FinishedLoop {
    pub pool: PagePool,
    pub display: Box<dyn DisplayBackend>,
    pub report: LoopReport,
    /// The failure that ended the loop; `None` after cancellation.
    pub error: Option<FlipbookError>,
}

impl FinishedLoop {
    /// Destroy every page, then report the loop's error if it had one.
    pub fn teardown(self) -> FlipbookResult<LoopReport> {
        let FinishedLoop {
            pool,
            mut display,
            mut report,
            error,
        } = self;

        report.pages_destroyed = pool.drain_and_destroy(display.as_mut());
        debug!("destroyed {} pages", report.pages_destroyed);

        match error {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }
}

/// The generation loop task.
pub struct GenerationLoop {
    pipeline: PipelineSlot,
    source: Box<dyn ImageSource>,
    display: Box<dyn DisplayBackend>,
    parent: DisplayParent,
    pool: PagePool,
    settings: watch::Receiver<LiveSettings>,
    cancel: CancellationSignal,
    state: watch::Sender<LoopState>,
    clock: ProcessClock,
    resource_dir: PathBuf,
    compute_units: ComputeUnits,
    resolution: Resolution,
    bypass_delay: Option<Duration>,
    report: LoopReport,
}

impl GenerationLoop {
    /// Assemble a loop from a validated configuration.
    ///
    /// # Errors
    ///
    /// - the configuration fails validation
    /// - bypass mode is off and no pipeline was supplied
    pub fn new(
        config: &FlipbookConfig,
        components: LoopComponents,
        settings: watch::Receiver<LiveSettings>,
        cancel: CancellationSignal,
        state: watch::Sender<LoopState>,
    ) -> FlipbookResult<Self> {
        config.validate()?;

        let LoopComponents {
            pipeline,
            source,
            display,
            parent,
        } = components;

        let (pipeline, bypass_delay) = if config.bypass {
            if pipeline.is_some() {
                info!("bypass mode enabled; the configured pipeline will not be used");
            }
            (None, Some(config.bypass_delay()))
        } else {
            let pipeline = pipeline.ok_or_else(|| {
                FlipbookError::config("pipeline", "none", "required unless bypass is enabled")
                    .with_recovery_suggestion("Supply a pipeline or enable bypass mode")
            })?;
            (Some(pipeline), None)
        };

        state.send_replace(LoopState::NotStarted);

        Ok(Self {
            pipeline: PipelineSlot::new(pipeline),
            source,
            display,
            parent,
            pool: PagePool::new(config.page_count)?,
            settings,
            cancel,
            state,
            clock: ProcessClock::start(),
            resource_dir: config.resource_dir.clone(),
            compute_units: config.compute_units,
            resolution: config.resolution,
            bypass_delay,
            report: LoopReport::new(),
        })
    }

    /// Use an existing clock, so flip timestamps share the owner's origin.
    pub fn with_clock(mut self, clock: ProcessClock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until cancelled or failed, dispose the pipeline, hand back the pool.
    pub async fn run(mut self) -> FinishedLoop {
        let outcome = self.drive().await;

        let error = match outcome {
            Ok(()) => {
                info!(
                    "generation loop cancelled after {} cycles",
                    self.report.cycles_completed
                );
                self.report.exit = Some(LoopExit::Cancelled);
                self.set_state(LoopState::Cancelled);
                None
            }
            Err(error) => {
                let priority = classify::priority(&error);
                if classify::is_fatal(&error) {
                    error!(priority, "generation loop failed: {}", error);
                } else {
                    warn!(priority, "generation loop stopped: {}", error);
                }
                self.report.exit = Some(LoopExit::Failed);
                self.set_state(LoopState::Failed);
                Some(error)
            }
        };

        self.pipeline.dispose();
        self.set_state(LoopState::Disposed);

        FinishedLoop {
            pool: self.pool,
            display: self.display,
            report: self.report,
            error,
        }
    }

    /// `Ok` only when the loop ended by cancellation.
    async fn drive(&mut self) -> FlipbookResult<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.set_state(LoopState::Initializing);
        if self.initialize().await? == CycleOutcome::Cancelled {
            return Ok(());
        }

        self.set_state(LoopState::Running);
        loop {
            if self.cycle().await? == CycleOutcome::Cancelled {
                return Ok(());
            }
        }
    }

    async fn initialize(&mut self) -> FlipbookResult<CycleOutcome> {
        let Some(pipeline) = self.pipeline.engage() else {
            info!("bypass mode, skipping pipeline initialization");
            return Ok(CycleOutcome::Completed);
        };

        info!(
            "loading pipeline '{}' from {} ({})",
            pipeline.name(),
            self.resource_dir.display(),
            self.compute_units
        );

        let cancel = &self.cancel;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(CycleOutcome::Cancelled),
            result = pipeline.initialize(&self.resource_dir, self.compute_units) => result,
        };

        match result {
            Ok(()) => {
                info!("pipeline loaded");
                Ok(CycleOutcome::Completed)
            }
            Err(error) if error.is_cancellation() => Ok(CycleOutcome::Cancelled),
            Err(error) => Err(error.with_operation("initialize pipeline")),
        }
    }

    async fn cycle(&mut self) -> FlipbookResult<CycleOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        let settings = self.settings.borrow_and_update().clone();
        if let Some(pipeline) = self.pipeline.get_mut() {
            pipeline.apply(&settings.params);
        }
        debug!("generating");

        let resolution = self.resolution;
        let display = &mut self.display;
        let acquired = self
            .pool
            .acquire(&self.parent, |parent| {
                Page::allocate(display.as_mut(), parent, resolution)
            })
            .map_err(|e| e.with_operation("acquire page"))?;
        match acquired {
            Acquired::Allocated(_) => self.report.pages_allocated += 1,
            Acquired::Reused(_) => self.report.pages_reused += 1,
        }
        let id = acquired.id();
        // The pool tracks rotation order, not exclusive use, so the page goes
        // back at the tail before its content is rewritten.
        self.pool.requeue(id)?;

        let frame = self.source.snapshot();
        let page = self
            .pool
            .page_mut(id)
            .ok_or_else(|| FlipbookError::state("running", "render", format!("{} vanished", id)))?;

        let cancel = &self.cancel;
        let rendered = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = render(
                self.pipeline.get_mut(),
                self.bypass_delay,
                &frame,
                page.buffer_mut(),
                cancel,
            ) => Some(result),
        };

        match rendered {
            None => return Ok(CycleOutcome::Cancelled),
            Some(Err(error)) if error.is_cancellation() => return Ok(CycleOutcome::Cancelled),
            Some(Err(error)) => {
                return Err(error
                    .with_operation("render page")
                    .with_metadata("page", id.to_string()));
            }
            Some(Ok(())) => {}
        }

        let now = self.clock.now();
        let page = self
            .pool
            .page_mut(id)
            .ok_or_else(|| FlipbookError::state("running", "flip", format!("{} vanished", id)))?;
        page.start_flipping(settings.speed, now, self.display.as_mut());

        self.report.cycles_completed += 1;
        debug!("{} flipped at {}", id, now);
        Ok(CycleOutcome::Completed)
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }
}

/// Produce one page of content, from the pipeline or the bypass substitute.
async fn render(
    pipeline: Option<&mut (dyn Pipeline + 'static)>,
    bypass_delay: Option<Duration>,
    frame: &RgbaImage,
    destination: &mut PageBuffer,
    cancel: &CancellationSignal,
) -> FlipbookResult<()> {
    match (bypass_delay, pipeline) {
        (Some(delay), _) => {
            tokio::time::sleep(delay).await;
            destination.write_image(frame)
        }
        (None, Some(pipeline)) => pipeline.run(frame, destination, cancel).await,
        (None, None) => Err(FlipbookError::state(
            "running",
            "render",
            "no pipeline configured",
        )),
    }
}

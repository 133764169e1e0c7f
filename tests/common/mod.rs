//! Common test utilities and helpers for the flipbook tests
//!
//! This module provides a scriptable pipeline, configuration shortcuts and
//! helpers for reading recorded display events.

#![allow(dead_code)]

use std::time::Duration;

use flipbook::FlipbookConfig;
use flipbook::core::page::Resolution;
use flipbook::display::recording::{DisplayEvent, DisplayLog};

/// Small pages keep the tests cheap.
pub const TEST_RESOLUTION: Resolution = Resolution::new(16, 16);

/// Configuration driving a mock pipeline.
pub fn pipeline_config(pages: usize) -> FlipbookConfig {
    FlipbookConfig {
        page_count: pages,
        resolution: TEST_RESOLUTION,
        ..FlipbookConfig::default()
    }
}

/// Configuration in bypass mode with the given substitute delay.
pub fn bypass_config(pages: usize, delay: Duration) -> FlipbookConfig {
    FlipbookConfig {
        page_count: pages,
        resolution: TEST_RESOLUTION,
        bypass: true,
        bypass_delay_ms: delay.as_millis() as u64,
        ..FlipbookConfig::default()
    }
}

/// `(object, start, speed)` of every presented flip, in order.
pub fn flips(log: &DisplayLog) -> Vec<(u64, Duration, f32)> {
    log.events()
        .into_iter()
        .filter_map(|event| match event {
            DisplayEvent::Presented {
                object,
                start,
                speed,
                ..
            } => Some((object, start.as_duration(), speed)),
            _ => None,
        })
        .collect()
}

/// Asserts every created object was released exactly once.
pub fn assert_all_released_once(log: &DisplayLog) {
    let mut created = log.created();
    let mut released = log.released();
    created.sort_unstable();
    released.sort_unstable();
    assert_eq!(created, released, "every page must be destroyed exactly once");
    assert_eq!(log.live(), 0);
}

/// Scriptable pipeline that counts every call
pub mod mock_pipeline {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use flipbook::GenerationParams;
    use flipbook::core::cancel::CancellationSignal;
    use flipbook::core::page::PageBuffer;
    use flipbook::error::{FlipbookError, FlipbookResult};
    use flipbook::pipeline::{ComputeUnits, Pipeline};
    use image::RgbaImage;

    /// Shared view of what the pipeline was asked to do.
    #[derive(Debug, Default)]
    pub struct PipelineCalls {
        initialized: AtomicUsize,
        applied: Mutex<Vec<GenerationParams>>,
        runs: AtomicUsize,
        disposed: AtomicUsize,
    }

    impl PipelineCalls {
        pub fn initialized(&self) -> usize {
            self.initialized.load(Ordering::SeqCst)
        }

        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }

        pub fn disposed(&self) -> usize {
            self.disposed.load(Ordering::SeqCst)
        }

        pub fn applied(&self) -> Vec<GenerationParams> {
            self.applied.lock().unwrap().clone()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.applied().into_iter().map(|p| p.prompt).collect()
        }
    }

    /// Mock pipeline whose timing and failures are set up front.
    #[derive(Debug)]
    pub struct MockPipeline {
        calls: Arc<PipelineCalls>,
        init_delay: Option<Duration>,
        run_delay: Duration,
        fail_init: bool,
        fail_run: Option<usize>,
        cancel_run: Option<usize>,
    }

    impl MockPipeline {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(PipelineCalls::default()),
                init_delay: Some(Duration::ZERO),
                run_delay: Duration::from_millis(10),
                fail_init: false,
                fail_run: None,
                cancel_run: None,
            }
        }

        pub fn calls(&self) -> Arc<PipelineCalls> {
            Arc::clone(&self.calls)
        }

        pub fn with_run_delay(mut self, delay: Duration) -> Self {
            self.run_delay = delay;
            self
        }

        pub fn with_init_delay(mut self, delay: Duration) -> Self {
            self.init_delay = Some(delay);
            self
        }

        /// Initialization never completes.
        pub fn hanging_init(mut self) -> Self {
            self.init_delay = None;
            self
        }

        pub fn failing_init(mut self) -> Self {
            self.fail_init = true;
            self
        }

        /// The `n`th run (1-based) fails with a generation error.
        pub fn failing_run(mut self, n: usize) -> Self {
            self.fail_run = Some(n);
            self
        }

        /// The `n`th run (1-based) unwinds as if it had observed cancellation.
        pub fn cancelling_run(mut self, n: usize) -> Self {
            self.cancel_run = Some(n);
            self
        }
    }

    #[async_trait]
    impl Pipeline for MockPipeline {
        fn name(&self) -> &str {
            "mock"
        }

        async fn initialize(
            &mut self,
            _resource_dir: &Path,
            _compute_units: ComputeUnits,
        ) -> FlipbookResult<()> {
            self.calls.initialized.fetch_add(1, Ordering::SeqCst);
            match self.init_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            if self.fail_init {
                return Err(FlipbookError::pipeline_init("mock", "model files missing"));
            }
            Ok(())
        }

        fn apply(&mut self, params: &GenerationParams) {
            self.calls.applied.lock().unwrap().push(params.clone());
        }

        async fn run(
            &mut self,
            source: &RgbaImage,
            destination: &mut PageBuffer,
            cancel: &CancellationSignal,
        ) -> FlipbookResult<()> {
            let run = self.calls.runs.fetch_add(1, Ordering::SeqCst) + 1;

            tokio::select! {
                _ = cancel.cancelled() => return Err(FlipbookError::cancelled("mock run")),
                _ = tokio::time::sleep(self.run_delay) => {}
            }

            if self.fail_run == Some(run) {
                return Err(FlipbookError::generation("mock run", "device lost"));
            }
            if self.cancel_run == Some(run) {
                return Err(FlipbookError::cancelled("mock run"));
            }
            destination.write_image(source)
        }

        fn dispose(&mut self) {
            self.calls.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

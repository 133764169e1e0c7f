use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flipbook::config::FlipbookConfig;
use flipbook::core::page::Resolution;
use flipbook::display::recording::RecordingDisplay;
use flipbook::display::snapshot::SnapshotDisplay;
use flipbook::source::{StillImageSource, TestPatternSource};
use flipbook::{ComputeUnits, FlipbookSession, HttpPipeline, LoopState};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Generative flipbook driver:
/// - pages are rendered by an AUTOMATIC1111-compatible img2img server
/// - `--bypass` replaces inference with a delay and a copy of the source
#[derive(Parser, Debug)]
#[command(name = "flipbook")]
#[command(about = "Keep a carousel of pages refreshed by an img2img pipeline")]
#[command(long_about = "Keep a carousel of pages refreshed by an img2img pipeline.
Every cycle the oldest page is re-rendered from the source image and flipped into view.
Settings come from an optional JSON file; command-line flags override it.")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// img2img server root
    #[arg(short, long, default_value = "http://127.0.0.1:7860")]
    endpoint: String,

    /// Source image; a moving test pattern when omitted
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Write every flipped page as a PNG into this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// How long to run
    #[arg(short, long, default_value = "0",
          help = "How long to run: 30s, 2m, 1h; 0 runs until Ctrl-C")]
    duration: String,

    /// Skip inference: wait, then copy the source into the page
    #[arg(long)]
    bypass: bool,

    #[arg(long, help = "Delay substituted for inference in bypass mode, in milliseconds")]
    bypass_delay_ms: Option<u64>,

    #[arg(long, help = "Number of pages in the carousel")]
    pages: Option<usize>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long, help = "Flip speed, 0.1 to 8")]
    speed: Option<f32>,

    #[arg(short, long)]
    prompt: Option<String>,

    #[arg(long, help = "Denoising strength, 0 to 1")]
    strength: Option<f32>,

    #[arg(long, help = "Inference steps, at most 20")]
    steps: Option<u32>,

    #[arg(long)]
    seed: Option<i64>,

    #[arg(long, help = "Classifier-free guidance scale")]
    guidance: Option<f32>,

    #[arg(long, help = "Model resource directory handed to the pipeline")]
    resource_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    compute_units: Option<ComputeUnits>,
}

impl Args {
    /// Configuration file (or defaults) with command-line overrides applied.
    fn to_config(&self) -> Result<FlipbookConfig> {
        let mut config = match &self.config {
            Some(path) => FlipbookConfig::from_json_file(path)?,
            None => FlipbookConfig::default(),
        };

        config.bypass |= self.bypass;
        if let Some(delay) = self.bypass_delay_ms {
            config.bypass_delay_ms = delay;
        }
        if let Some(pages) = self.pages {
            config.page_count = pages;
        }
        config.resolution = Resolution::new(
            self.width.unwrap_or(config.resolution.width),
            self.height.unwrap_or(config.resolution.height),
        );
        if let Some(speed) = self.speed {
            config.speed = speed;
        }
        if let Some(prompt) = &self.prompt {
            config.params.prompt = prompt.clone();
        }
        if let Some(strength) = self.strength {
            config.params.strength = strength;
        }
        if let Some(steps) = self.steps {
            config.params.step_count = steps;
        }
        if let Some(seed) = self.seed {
            config.params.seed = seed;
        }
        if let Some(guidance) = self.guidance {
            config.params.guidance_scale = guidance;
        }
        if let Some(dir) = &self.resource_dir {
            config.resource_dir = dir.clone();
        }
        if let Some(units) = self.compute_units {
            config.compute_units = units;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let run_for = parse_duration(&args.duration)?;
    let config = args.to_config()?;

    info!(
        "{} pages at {}, {}",
        config.page_count,
        config.resolution,
        if config.bypass { "bypass" } else { args.endpoint.as_str() }
    );

    let mut builder = FlipbookSession::builder();
    if !config.bypass {
        builder = builder.with_pipeline(HttpPipeline::new(&args.endpoint)?);
    }
    builder = match &args.source {
        Some(path) => builder.with_image_source(
            StillImageSource::open(path, config.resolution)
                .with_context(|| format!("loading source image {}", path.display()))?,
        ),
        None => builder.with_image_source(TestPatternSource::new(config.resolution)),
    };
    builder = match &args.snapshot_dir {
        Some(dir) => builder.with_display(SnapshotDisplay::new(dir)?),
        None => builder.with_display(RecordingDisplay::new()),
    };

    let running = builder.with_config(config).build()?.start();

    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            info!("interrupted, shutting down");
        }
        _ = deadline => info!("run time elapsed, shutting down"),
        state = running.stopped() => {
            if state != LoopState::Cancelled {
                warn!("generation loop stopped on its own ({})", state);
            }
        }
    }

    let report = running.shutdown().await?;
    println!("Cycles completed: {}", report.cycles_completed);
    println!(
        "Pages: {} allocated, {} reuses, {} destroyed",
        report.pages_allocated, report.pages_reused, report.pages_destroyed
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flipbook=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Parse duration string like "30s", "2m", "1h"; zero means no limit.
fn parse_duration(duration: &str) -> Result<Option<Duration>> {
    let seconds = if let Ok(seconds) = duration.parse::<u64>() {
        seconds
    } else {
        let len = duration.len();
        if len < 2 || !duration.is_char_boundary(len - 1) {
            return Err(anyhow::anyhow!("Invalid duration format: {}", duration));
        }

        let (num_str, unit) = duration.split_at(len - 1);
        let num: u64 = num_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid number in duration: {}", num_str))?;

        let multiplier: u64 = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid duration unit: {}. Use 's' for seconds, 'm' for minutes, 'h' for hours",
                    unit
                ));
            }
        };
        num.checked_mul(multiplier)
            .ok_or_else(|| anyhow::anyhow!("Duration too long: {}", duration))?
    };

    Ok((seconds > 0).then(|| Duration::from_secs(seconds)))
}

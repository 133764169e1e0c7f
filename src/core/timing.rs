//! Process time and flip speed.
//!
//! Timestamps are measured from the moment a session starts, using tokio's
//! clock so that paused-time tests observe exact values.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{FlipbookError, FlipbookResult};

/// Slowest accepted flip speed.
pub const MIN_FLIP_SPEED: f32 = 0.1;
/// Fastest accepted flip speed.
pub const MAX_FLIP_SPEED: f32 = 8.0;

/// Elapsed process time at which something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub fn from_duration(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Seconds since process start, the unit the flip shader consumes.
    pub fn as_secs_f32(&self) -> f32 {
        self.0.as_secs_f32()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}

/// Monotonic clock anchored at session start.
#[derive(Debug, Clone, Copy)]
pub struct ProcessClock {
    origin: Instant,
}

impl ProcessClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

/// Playback speed of a page flip, bounded to `MIN_FLIP_SPEED..=MAX_FLIP_SPEED`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FlipSpeed(f32);

impl FlipSpeed {
    pub fn new(speed: f32) -> FlipbookResult<Self> {
        if !speed.is_finite() || !(MIN_FLIP_SPEED..=MAX_FLIP_SPEED).contains(&speed) {
            return Err(FlipbookError::validation(
                "speed",
                format!("must be between {} and {}", MIN_FLIP_SPEED, MAX_FLIP_SPEED),
                speed.to_string(),
            ));
        }
        Ok(Self(speed))
    }

    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Default for FlipSpeed {
    fn default() -> Self {
        Self(1.0)
    }
}

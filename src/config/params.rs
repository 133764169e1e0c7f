//! Generation parameters and the live settings channel.
//!
//! The generation loop takes a snapshot of [`LiveSettings`] at the start of
//! every cycle and applies it to the pipeline in one go. Changes published
//! through a [`SettingsHandle`] while a cycle is running land on the next one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::timing::FlipSpeed;
use crate::error::{FlipbookError, FlipbookResult};

/// Highest accepted denoising step count.
pub const MAX_STEP_COUNT: u32 = 20;

/// Parameters handed to the generative pipeline before each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub prompt: String,
    /// How far the output may depart from the source image, 0 to 1.
    pub strength: f32,
    pub step_count: u32,
    pub seed: i64,
    pub guidance_scale: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: "vincent van gogh".to_string(),
            strength: 0.5,
            step_count: 5,
            seed: 1,
            guidance_scale: 6.0,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> FlipbookResult<()> {
        if !self.strength.is_finite() || !(0.0..=1.0).contains(&self.strength) {
            return Err(FlipbookError::validation(
                "strength",
                "must be between 0 and 1",
                self.strength.to_string(),
            ));
        }
        if self.step_count > MAX_STEP_COUNT {
            return Err(FlipbookError::validation(
                "step_count",
                format!("must be at most {}", MAX_STEP_COUNT),
                self.step_count.to_string(),
            ));
        }
        if !self.guidance_scale.is_finite() {
            return Err(FlipbookError::validation(
                "guidance_scale",
                "must be finite",
                self.guidance_scale.to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the loop reads fresh each cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveSettings {
    pub params: GenerationParams,
    pub speed: FlipSpeed,
}

/// Publisher side of the live settings channel.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<LiveSettings>>,
}

impl SettingsHandle {
    pub fn new(initial: LiveSettings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Receiver for the generation loop.
    pub fn subscribe(&self) -> watch::Receiver<LiveSettings> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> LiveSettings {
        self.tx.borrow().clone()
    }

    /// Replace the generation parameters after validating them.
    pub fn set_params(&self, params: GenerationParams) -> FlipbookResult<()> {
        params.validate()?;
        self.tx.send_modify(|settings| settings.params = params);
        Ok(())
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.tx.send_modify(|settings| settings.params.prompt = prompt);
    }

    pub fn set_speed(&self, speed: f32) -> FlipbookResult<()> {
        let speed = FlipSpeed::new(speed)?;
        self.tx.send_modify(|settings| settings.speed = speed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.prompt, "vincent van gogh");
        assert_eq!(params.step_count, 5);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_param_validation() {
        let mut params = GenerationParams::default();

        params.strength = 1.5;
        assert!(params.validate().is_err());
        params.strength = 0.5;

        params.step_count = 21;
        assert!(params.validate().is_err());
        params.step_count = 20;
        assert!(params.validate().is_ok());

        params.guidance_scale = f32::INFINITY;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_handle_publishes_to_subscribers() {
        let handle = SettingsHandle::new(LiveSettings::default());
        let mut rx = handle.subscribe();

        handle.set_prompt("hokusai");
        handle.set_speed(4.0).unwrap();
        assert!(handle.set_speed(20.0).is_err());

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.params.prompt, "hokusai");
        assert_eq!(seen.speed.get(), 4.0);
        assert_eq!(handle.snapshot(), seen);
    }

    #[test]
    fn test_rejected_params_are_not_published() {
        let handle = SettingsHandle::new(LiveSettings::default());
        let bad = GenerationParams {
            strength: -1.0,
            ..GenerationParams::default()
        };
        assert!(handle.set_params(bad).is_err());
        assert_eq!(handle.snapshot().params.strength, 0.5);
    }
}

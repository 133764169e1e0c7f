//! # Configuration Module
//!
//! Static session configuration and the live generation settings the loop
//! re-reads before every cycle.

pub mod config;
pub mod params;

pub use config::FlipbookConfig;
pub use params::{GenerationParams, LiveSettings, SettingsHandle};

//! # VCMP Common Library
//!
//! Shared code for the voice channel music player crates:
//! - Error type
//! - Announcement events and the EventBus
//! - Crossfade curve presets and fade shapes
//! - Filter preset table
//! - Bootstrap configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod filters;

pub use error::{Error, Result};
pub use fade_curves::{CrossfadeCurve, FadeShape};
pub use filters::FilterPreset;

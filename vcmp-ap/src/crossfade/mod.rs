//! Crossfade scheduling support
//!
//! Settings, transition planning and the outgoing-volume ramp. The state
//! machine that drives them lives in the session actor.

pub mod plan;
pub mod ramp;
pub mod settings;

pub use plan::{should_arm, CrossfadePlan, DJ_CEILING_SECS};
pub use ramp::{spawn_volume_ramp, RAMP_STEPS};
pub use settings::{CrossfadeSettings, DjFlags, SettingsStore, SharedSettings};

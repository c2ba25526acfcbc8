//! Transition planning
//!
//! `optimal = min(configured, floor(min(cur, next) / 4))`, further capped at
//! 10 seconds under the DJ preset. The transition starts `optimal` seconds
//! before the current track ends.

use serde::Serialize;
use std::time::Duration;

use super::settings::CrossfadeSettings;
use crate::session::queue::TrackRequest;

/// Longest transition allowed under the DJ preset (seconds)
pub const DJ_CEILING_SECS: u32 = 10;

/// Timing for one transition between two adjacent tracks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossfadePlan {
    /// Current track length (seconds)
    pub current_duration: f64,
    /// Next track length (seconds)
    pub next_duration: f64,
    /// Transition length (seconds)
    pub optimal_crossfade_secs: u32,
    /// Delay from current-track start to transition start
    pub crossfade_start_offset_ms: u64,
    /// Both tracks are long enough for a transition
    pub eligible: bool,
}

impl CrossfadePlan {
    /// Compute the plan for a pair of durations
    pub fn compute(current_duration: f64, next_duration: f64, settings: &CrossfadeSettings) -> Self {
        let optimal = optimal_crossfade_secs(current_duration, next_duration, settings);
        let start_offset_secs = (current_duration - optimal as f64).max(0.0);
        let min_length = settings.min_track_length_secs as f64;

        Self {
            current_duration,
            next_duration,
            optimal_crossfade_secs: optimal,
            crossfade_start_offset_ms: (start_offset_secs * 1000.0) as u64,
            // A zero-length transition is just sequential playback
            eligible: current_duration > min_length && next_duration > min_length && optimal > 0,
        }
    }

    /// Delay from current-track start to transition start
    pub fn start_offset(&self) -> Duration {
        Duration::from_millis(self.crossfade_start_offset_ms)
    }

    /// Length of the transition
    pub fn crossfade_duration(&self) -> Duration {
        Duration::from_secs(self.optimal_crossfade_secs as u64)
    }
}

/// Transition length for two durations under the given settings
pub fn optimal_crossfade_secs(current: f64, next: f64, settings: &CrossfadeSettings) -> u32 {
    let shorter = current.min(next);
    let quarter = if shorter.is_finite() && shorter > 0.0 {
        (shorter / 4.0).floor() as u32
    } else {
        0
    };

    let mut optimal = settings.duration_secs.min(quarter);
    if settings.dj_mode() {
        optimal = optimal.min(DJ_CEILING_SECS);
    }
    optimal
}

/// Whether a transition may be planned from `current` into `next`
///
/// Requires crossfade enabled, looping off, a next track, and no filter on
/// either side. Duration eligibility is decided later by the plan.
pub fn should_arm(
    settings: &CrossfadeSettings,
    current: &TrackRequest,
    next: Option<&TrackRequest>,
    looping: bool,
) -> bool {
    if !settings.enabled || looping {
        return false;
    }
    match next {
        Some(next) => current.filter.is_none() && next.filter.is_none(),
        None => false,
    }
}

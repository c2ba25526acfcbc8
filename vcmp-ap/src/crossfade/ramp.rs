//! Stepped attenuation of the outgoing player

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;
use vcmp_common::FadeShape;

use crate::transport::AudioPlayer;

/// Discrete volume steps per ramp
pub const RAMP_STEPS: u32 = 20;

/// Gain after `step` of [`RAMP_STEPS`] steps
pub fn ramp_gain(shape: FadeShape, step: u32) -> f32 {
    shape.calculate_fade_out(step.min(RAMP_STEPS) as f32 / RAMP_STEPS as f32)
}

/// Ramp `player` from full volume to silence over `duration`
///
/// Aborting the returned handle leaves the volume where it is.
pub fn spawn_volume_ramp(
    player: Arc<dyn AudioPlayer>,
    duration: Duration,
    shape: FadeShape,
) -> JoinHandle<()> {
    let step_len = duration / RAMP_STEPS;
    tokio::spawn(async move {
        player.set_volume(1.0);
        for step in 1..=RAMP_STEPS {
            tokio::time::sleep(step_len).await;
            let gain = ramp_gain(shape, step);
            trace!("Ramp step {}/{}: gain {:.3}", step, RAMP_STEPS, gain);
            player.set_volume(gain);
        }
    })
}

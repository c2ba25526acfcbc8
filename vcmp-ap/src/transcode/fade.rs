//! Fade filter construction
//!
//! Builds the filter graph for one side of a crossfade. Under the DJ preset
//! the ramp shapes are fixed (exponential in, logarithmic out) and the DJ
//! colouring options apply; other presets produce a bare `afade`.

use vcmp_common::FadeShape;

use crate::crossfade::settings::CrossfadeSettings;

/// Peak level assumed when analysis fails
pub const DEFAULT_PEAK: f32 = 0.8;

/// Lowest gain auto-gain will apply
const MIN_AUTO_GAIN: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// Parameters for a faded decode
#[derive(Debug, Clone, PartialEq)]
pub struct FadeSpec {
    pub direction: FadeDirection,
    /// Ramp length in seconds
    pub duration_secs: f64,
    pub shape: FadeShape,
    /// Start decoding this many seconds into the file
    pub seek_secs: f64,
    /// DJ colouring enabled for this ramp
    pub dj: bool,
    pub high_boost: bool,
    pub stereo_spread: bool,
    pub low_cut: bool,
    pub eq_cut: bool,
    /// Static gain applied after the ramp (auto-gain)
    pub gain: Option<f32>,
}

impl FadeSpec {
    /// Fade-in for the incoming track
    ///
    /// `peak` is only consulted when auto-gain is on under the DJ preset.
    pub fn intro(settings: &CrossfadeSettings, duration_secs: f64, peak: Option<f32>) -> Self {
        let dj = settings.dj_mode();
        Self {
            direction: FadeDirection::In,
            duration_secs,
            shape: settings.curve.intro_shape(),
            seek_secs: 0.0,
            dj,
            high_boost: dj && settings.dj.high_boost,
            stereo_spread: dj && settings.dj.stereo_spread,
            low_cut: false,
            eq_cut: false,
            gain: if dj && settings.auto_gain {
                Some(auto_gain(peak.unwrap_or(DEFAULT_PEAK)))
            } else {
                None
            },
        }
    }

    /// Fade-out for the outgoing track, resumed at `seek_secs`
    pub fn outro(settings: &CrossfadeSettings, duration_secs: f64, seek_secs: f64) -> Self {
        let dj = settings.dj_mode();
        Self {
            direction: FadeDirection::Out,
            duration_secs,
            shape: settings.curve.outro_shape(),
            seek_secs: seek_secs.max(0.0),
            dj,
            high_boost: false,
            stereo_spread: false,
            low_cut: dj && settings.dj.low_cut,
            eq_cut: dj && settings.eq_crossfade,
            gain: None,
        }
    }

    /// Filter graph for this ramp
    pub fn filter_graph(&self) -> String {
        let mut filters = Vec::new();
        let duration = format_secs(self.duration_secs);

        match self.direction {
            FadeDirection::In => {
                filters.push(format!(
                    "afade=t=in:st=0:d={}:curve={}",
                    duration,
                    self.shape.filter_curve_name()
                ));
                if self.high_boost {
                    filters.push("equalizer=f=8000:width_type=h:width=1000:g=3".to_string());
                }
                if self.stereo_spread {
                    filters.push("extrastereo=m=2.5".to_string());
                }
            }
            FadeDirection::Out => {
                // Decoding restarts at the seek point, so the ramp starts at 0
                filters.push(format!(
                    "afade=t=out:st=0:d={}:curve={}",
                    duration,
                    self.shape.filter_curve_name()
                ));
                if self.low_cut {
                    filters.push("highpass=f=100".to_string());
                }
                if self.eq_cut {
                    filters.push("equalizer=f=2000:width_type=h:width=500:g=-2".to_string());
                }
            }
        }

        if let Some(gain) = self.gain {
            filters.push(format!("volume={}", format_secs(gain as f64)));
        }

        filters.join(",")
    }
}

/// Gain that lifts a track with the given peak toward full scale
pub fn auto_gain(peak: f32) -> f32 {
    if !peak.is_finite() || peak <= 0.0 {
        return 1.0 / DEFAULT_PEAK;
    }
    (1.0 / peak).max(MIN_AUTO_GAIN)
}

fn format_secs(value: f64) -> String {
    let s = format!("{:.3}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

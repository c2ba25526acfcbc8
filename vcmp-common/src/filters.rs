//! Filter preset table
//!
//! Filter presets are a closed set. Each preset maps to one fixed filter-graph
//! string for the transcoder; only tempo-class presets take a speed factor.
//! Adding a preset means adding a variant and a table row below.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Output sample rate every filter graph assumes
pub const FILTER_SAMPLE_RATE: u32 = 48_000;

/// Lowest accepted speed factor for tempo presets
pub const MIN_SPEED: f64 = 0.1;

/// Highest accepted speed factor for tempo presets
pub const MAX_SPEED: f64 = 5.0;

/// Default speed applied when a tempo preset is requested without a factor
pub const DEFAULT_TEMPO_SPEED: f64 = 1.5;

// Range a single tempo stage accepts without artifacts
const TEMPO_STAGE_MIN: f64 = 0.5;
const TEMPO_STAGE_MAX: f64 = 2.0;

/// Audio filter preset attached to a queued track
///
/// "No filter" is expressed as `Option::<FilterPreset>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterPreset {
    /// Slow left/right panning ("8D audio")
    Spatial8d,
    /// Single long echo tap
    Echo,
    /// Tempo change without pitch change; uses the speed factor
    Tempo,
    /// Pitch raised by resampling
    PitchShift,
    /// Low-frequency boost
    Bass,
    /// Heavy low-frequency boost
    BassExtreme,
}

impl FilterPreset {
    /// Filter graph for this preset
    ///
    /// `speed` is only consulted by [`FilterPreset::Tempo`].
    pub fn filter_graph(&self, speed: f64) -> String {
        match self {
            FilterPreset::Spatial8d => "apulsator=hz=0.125".to_string(),
            FilterPreset::Echo => "aecho=0.8:0.9:1000:0.3".to_string(),
            FilterPreset::Tempo => tempo_chain(speed),
            FilterPreset::PitchShift => format!(
                "asetrate={rate}*1.2,aresample={rate}",
                rate = FILTER_SAMPLE_RATE
            ),
            FilterPreset::Bass => "equalizer=f=60:width_type=h:width=50:g=10,\
                 equalizer=f=170:width_type=h:width=50:g=10,volume=1.2"
                .to_string(),
            FilterPreset::BassExtreme => "equalizer=f=60:width_type=h:width=50:g=15,\
                 equalizer=f=170:width_type=h:width=50:g=12,\
                 equalizer=f=310:width_type=h:width=50:g=8,volume=1.5"
                .to_string(),
        }
    }

    /// True for presets whose graph depends on the speed factor
    pub fn uses_speed(&self) -> bool {
        matches!(self, FilterPreset::Tempo)
    }

    /// Parse a preset name
    ///
    /// `"none"` (and the empty string) parse to `Ok(None)`. Unknown names are
    /// rejected.
    pub fn parse(s: &str) -> Result<Option<Self>> {
        let preset = match s.trim().to_lowercase().as_str() {
            "" | "none" => return Ok(None),
            "spatial-8d" | "8d" => FilterPreset::Spatial8d,
            "echo" => FilterPreset::Echo,
            "tempo" | "speed" | "rate" => FilterPreset::Tempo,
            "pitch-shift" | "pitch" => FilterPreset::PitchShift,
            "bass" => FilterPreset::Bass,
            "bass-extreme" | "bassboost" => FilterPreset::BassExtreme,
            other => {
                return Err(Error::InvalidInput(format!(
                    "Unknown filter preset: {}",
                    other
                )))
            }
        };
        Ok(Some(preset))
    }

    /// Canonical preset name
    pub fn name(&self) -> &'static str {
        match self {
            FilterPreset::Spatial8d => "spatial-8d",
            FilterPreset::Echo => "echo",
            FilterPreset::Tempo => "tempo",
            FilterPreset::PitchShift => "pitch-shift",
            FilterPreset::Bass => "bass",
            FilterPreset::BassExtreme => "bass-extreme",
        }
    }

    /// All presets, in table order
    pub fn all_variants() -> &'static [FilterPreset] {
        &[
            FilterPreset::Spatial8d,
            FilterPreset::Echo,
            FilterPreset::Tempo,
            FilterPreset::PitchShift,
            FilterPreset::Bass,
            FilterPreset::BassExtreme,
        ]
    }
}

impl std::fmt::Display for FilterPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Validate a user-supplied speed factor
pub fn validate_speed(speed: f64) -> Result<f64> {
    if speed.is_finite() && (MIN_SPEED..=MAX_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(Error::InvalidInput(format!(
            "Speed must be between {} and {}, got {}",
            MIN_SPEED, MAX_SPEED, speed
        )))
    }
}

/// Build a chain of tempo stages whose product equals `speed`
///
/// Each stage stays within the single-stage range.
fn tempo_chain(speed: f64) -> String {
    let mut remaining = speed.clamp(MIN_SPEED, MAX_SPEED);
    let mut stages = Vec::new();

    while remaining > TEMPO_STAGE_MAX {
        stages.push(TEMPO_STAGE_MAX);
        remaining /= TEMPO_STAGE_MAX;
    }
    while remaining < TEMPO_STAGE_MIN {
        stages.push(TEMPO_STAGE_MIN);
        remaining /= TEMPO_STAGE_MIN;
    }
    stages.push(remaining);

    stages
        .iter()
        .map(|s| format!("atempo={}", format_factor(*s)))
        .collect::<Vec<_>>()
        .join(",")
}

fn format_factor(value: f64) -> String {
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

//! Fade curve definitions for crossfade transitions
//!
//! Two layers live here:
//! - [`CrossfadeCurve`]: the user-selectable curve preset stored in settings
//! - [`FadeShape`]: the concrete ramp shape applied to one side of a transition
//!
//! A preset resolves to an intro shape and an outro shape. The `dj` preset
//! always resolves to exponential-in / logarithmic-out, independent of any
//! other setting.

use serde::{Deserialize, Serialize};

/// Concrete shape of a single volume ramp
///
/// Gains are computed on a normalized position `t` in `[0.0, 1.0]`:
/// - Linear: constant rate of change
/// - Exponential: slow start, fast finish (fading out: early drop)
/// - Logarithmic: fast start, slow finish (fading out: hold, then drop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeShape {
    /// y = t
    Linear,
    /// y = t²
    Exponential,
    /// y = sqrt(t)
    Logarithmic,
}

impl FadeShape {
    /// Gain multiplier for a fade-in at normalized position
    ///
    /// Returns 0.0 at the start of the ramp and 1.0 at the end.
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeShape::Linear => t,
            FadeShape::Exponential => t * t,
            FadeShape::Logarithmic => t.sqrt(),
        }
    }

    /// Gain multiplier for a fade-out at normalized position
    ///
    /// Returns 1.0 at the start of the ramp and 0.0 at the end. A fade-out is
    /// the fade-in played backwards, matching what `afade=t=out` does with the
    /// same curve name: logarithmic holds the level and then drops, while
    /// exponential drops early and tails off.
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);
        self.calculate_fade_in(1.0 - t)
    }

    /// Curve name understood by the transcoder's `afade` filter
    pub fn filter_curve_name(&self) -> &'static str {
        match self {
            FadeShape::Linear => "tri",
            FadeShape::Exponential => "exp",
            FadeShape::Logarithmic => "log",
        }
    }
}

/// Crossfade curve preset
///
/// Stored in the durable settings table by its canonical lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossfadeCurve {
    /// Same linear ramp on both sides
    Linear,
    /// Exponential ramp on both sides
    Exponential,
    /// Logarithmic ramp on both sides
    Logarithmic,
    /// Fast attack on the incoming track, slow release on the outgoing one.
    ///
    /// Also enables the DJ extras (filter colouring, 10 second ceiling).
    Dj,
}

impl CrossfadeCurve {
    /// Shape used to ramp the incoming track in
    pub fn intro_shape(&self) -> FadeShape {
        match self {
            CrossfadeCurve::Linear => FadeShape::Linear,
            CrossfadeCurve::Exponential => FadeShape::Exponential,
            CrossfadeCurve::Logarithmic => FadeShape::Logarithmic,
            CrossfadeCurve::Dj => FadeShape::Exponential,
        }
    }

    /// Shape used to ramp the outgoing track out
    pub fn outro_shape(&self) -> FadeShape {
        match self {
            CrossfadeCurve::Linear => FadeShape::Linear,
            CrossfadeCurve::Exponential => FadeShape::Exponential,
            CrossfadeCurve::Logarithmic => FadeShape::Logarithmic,
            CrossfadeCurve::Dj => FadeShape::Logarithmic,
        }
    }

    /// True for the DJ preset
    pub fn is_dj(&self) -> bool {
        matches!(self, CrossfadeCurve::Dj)
    }

    /// Parse curve from its stored or user-entered name
    ///
    /// Accepts a few common aliases; matching is case-insensitive.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" | "lin" => Some(CrossfadeCurve::Linear),
            "exponential" | "exp" => Some(CrossfadeCurve::Exponential),
            "logarithmic" | "log" => Some(CrossfadeCurve::Logarithmic),
            "dj" => Some(CrossfadeCurve::Dj),
            _ => None,
        }
    }

    /// Canonical stored representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            CrossfadeCurve::Linear => "linear",
            CrossfadeCurve::Exponential => "exponential",
            CrossfadeCurve::Logarithmic => "logarithmic",
            CrossfadeCurve::Dj => "dj",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            CrossfadeCurve::Linear => "Linear",
            CrossfadeCurve::Exponential => "Exponential",
            CrossfadeCurve::Logarithmic => "Logarithmic",
            CrossfadeCurve::Dj => "DJ",
        }
    }

    /// All presets, in display order
    pub fn all_variants() -> &'static [CrossfadeCurve] {
        &[
            CrossfadeCurve::Linear,
            CrossfadeCurve::Exponential,
            CrossfadeCurve::Logarithmic,
            CrossfadeCurve::Dj,
        ]
    }
}

impl Default for CrossfadeCurve {
    fn default() -> Self {
        CrossfadeCurve::Dj
    }
}

impl std::fmt::Display for CrossfadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: [FadeShape; 3] = [
        FadeShape::Linear,
        FadeShape::Exponential,
        FadeShape::Logarithmic,
    ];

    #[test]
    fn test_fade_in_bounds() {
        for shape in SHAPES {
            let start_val = shape.calculate_fade_in(0.0);
            let end_val = shape.calculate_fade_in(1.0);
            assert!(
                start_val.abs() < 0.01,
                "{:?} fade-in at 0.0 should be ~0.0, got {}",
                shape,
                start_val
            );
            assert!(
                (end_val - 1.0).abs() < 0.01,
                "{:?} fade-in at 1.0 should be ~1.0, got {}",
                shape,
                end_val
            );
        }
    }

    #[test]
    fn test_fade_out_bounds() {
        for shape in SHAPES {
            let start_val = shape.calculate_fade_out(0.0);
            let end_val = shape.calculate_fade_out(1.0);
            assert!(
                (start_val - 1.0).abs() < 0.01,
                "{:?} fade-out at 0.0 should be ~1.0, got {}",
                shape,
                start_val
            );
            assert!(
                end_val.abs() < 0.01,
                "{:?} fade-out at 1.0 should be ~0.0, got {}",
                shape,
                end_val
            );
        }
    }

    #[test]
    fn test_fade_out_monotonic() {
        for shape in SHAPES {
            let mut previous = f32::MAX;
            for step in 0..=20 {
                let gain = shape.calculate_fade_out(step as f32 / 20.0);
                assert!(gain <= previous, "{:?} not monotonic at step {}", shape, step);
                previous = gain;
            }
        }
    }

    #[test]
    fn test_fade_out_mirrors_fade_in() {
        for shape in SHAPES {
            for step in 0..=10 {
                let t = step as f32 / 10.0;
                let diff = shape.calculate_fade_out(t) - shape.calculate_fade_in(1.0 - t);
                assert!(diff.abs() < 1e-6, "{:?} at {}", shape, t);
            }
        }
    }

    #[test]
    fn test_logarithmic_release_holds_level() {
        // Slow release: still above the linear ramp halfway through
        assert!(FadeShape::Logarithmic.calculate_fade_out(0.5) > 0.7);
        assert!(FadeShape::Logarithmic.calculate_fade_out(0.75) > 0.45);
        assert!(FadeShape::Exponential.calculate_fade_out(0.5) < 0.3);
    }

    #[test]
    fn test_position_is_clamped() {
        assert_eq!(FadeShape::Linear.calculate_fade_in(-1.0), 0.0);
        assert_eq!(FadeShape::Linear.calculate_fade_in(2.0), 1.0);
        assert_eq!(FadeShape::Logarithmic.calculate_fade_out(5.0), 0.0);
    }

    #[test]
    fn test_dj_forces_exp_in_log_out() {
        assert_eq!(CrossfadeCurve::Dj.intro_shape(), FadeShape::Exponential);
        assert_eq!(CrossfadeCurve::Dj.outro_shape(), FadeShape::Logarithmic);
        assert!(CrossfadeCurve::Dj.is_dj());
        assert!(!CrossfadeCurve::Linear.is_dj());
    }

    #[test]
    fn test_symmetric_presets() {
        for curve in [
            CrossfadeCurve::Linear,
            CrossfadeCurve::Exponential,
            CrossfadeCurve::Logarithmic,
        ] {
            assert_eq!(curve.intro_shape(), curve.outro_shape());
        }
    }

    #[test]
    fn test_database_round_trip() {
        for curve in CrossfadeCurve::all_variants() {
            let parsed = CrossfadeCurve::from_str(curve.to_db_string()).unwrap();
            assert_eq!(*curve, parsed, "Round-trip failed for {:?}", curve);
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(CrossfadeCurve::from_str("cosine"), None);
        assert_eq!(CrossfadeCurve::from_str(""), None);
        assert_eq!(CrossfadeCurve::from_str("DJ"), Some(CrossfadeCurve::Dj));
    }

    #[test]
    fn test_filter_curve_names() {
        assert_eq!(FadeShape::Linear.filter_curve_name(), "tri");
        assert_eq!(FadeShape::Exponential.filter_curve_name(), "exp");
        assert_eq!(FadeShape::Logarithmic.filter_curve_name(), "log");
    }
}

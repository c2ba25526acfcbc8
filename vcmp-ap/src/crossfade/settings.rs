//! Process-wide crossfade settings
//!
//! [`CrossfadeSettings`] is a plain value. [`SharedSettings`] owns the live
//! copy, persists every mutation through a [`SettingsStore`] and applies it
//! only after the store accepted it, so a rejected or failed change leaves
//! the live copy untouched.
//!
//! Sessions take a snapshot when they arm a transition and keep using it for
//! that transition even if the settings change mid-flight.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use vcmp_common::CrossfadeCurve;

use crate::error::{Error, Result};

/// Shortest configurable crossfade (seconds)
pub const MIN_DURATION_SECS: u32 = 1;

/// Longest configurable crossfade (seconds)
pub const MAX_DURATION_SECS: u32 = 15;

/// Longest minimum-track-length accepted (one hour)
pub const MAX_MIN_TRACK_LENGTH_SECS: u32 = 3600;

/// Extra colouring applied by the DJ curve preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DjFlags {
    /// High-pass the outgoing track while it fades out
    pub low_cut: bool,
    /// Lift high frequencies of the incoming track while it fades in
    pub high_boost: bool,
    /// Widen the stereo image of the incoming track
    pub stereo_spread: bool,
}

impl Default for DjFlags {
    fn default() -> Self {
        Self {
            low_cut: true,
            high_boost: true,
            stereo_spread: true,
        }
    }
}

/// Crossfade configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossfadeSettings {
    /// Master switch
    pub enabled: bool,
    /// Configured transition length in seconds (1-15)
    pub duration_secs: u32,
    /// Curve preset
    pub curve: CrossfadeCurve,
    /// Both tracks must be longer than this for a transition to be planned
    pub min_track_length_secs: u32,
    /// DJ preset extras
    pub dj: DjFlags,
    /// Normalize the incoming track from a peak estimate
    pub auto_gain: bool,
    /// Slight upper-mid cut on the outgoing track
    pub eq_crossfade: bool,
}

impl Default for CrossfadeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: 5,
            curve: CrossfadeCurve::Dj,
            min_track_length_secs: 15,
            dj: DjFlags::default(),
            auto_gain: true,
            eq_crossfade: true,
        }
    }
}

impl CrossfadeSettings {
    /// Check every field against its accepted range
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration_secs) {
            return Err(Error::SettingsValidation(format!(
                "Crossfade duration must be {}-{} seconds, got {}",
                MIN_DURATION_SECS, MAX_DURATION_SECS, self.duration_secs
            )));
        }
        if self.min_track_length_secs > MAX_MIN_TRACK_LENGTH_SECS {
            return Err(Error::SettingsValidation(format!(
                "Minimum track length must be at most {} seconds, got {}",
                MAX_MIN_TRACK_LENGTH_SECS, self.min_track_length_secs
            )));
        }
        Ok(())
    }

    /// True when the DJ preset is selected
    pub fn dj_mode(&self) -> bool {
        self.curve.is_dj()
    }
}

/// Durable storage for crossfade settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load stored settings, filling gaps with defaults
    async fn load(&self) -> Result<CrossfadeSettings>;

    /// Persist all settings atomically
    async fn save(&self, settings: &CrossfadeSettings) -> Result<()>;
}

/// Live, process-wide crossfade settings
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SharedSettings {
    current: Arc<RwLock<CrossfadeSettings>>,
    store: Arc<dyn SettingsStore>,
    /// Serializes mutations so read-modify-persist-apply is never interleaved
    write_lock: Arc<Mutex<()>>,
    /// Curve to restore when DJ mode is toggled off
    previous_curve: Arc<Mutex<Option<CrossfadeCurve>>>,
}

impl SharedSettings {
    /// Load settings from the store once at startup
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let settings = store.load().await?;
        settings.validate()?;
        info!(
            "Loaded crossfade settings: enabled={}, duration={}s, curve={}",
            settings.enabled, settings.duration_secs, settings.curve
        );
        Ok(Self {
            current: Arc::new(RwLock::new(settings)),
            store,
            write_lock: Arc::new(Mutex::new(())),
            previous_curve: Arc::new(Mutex::new(None)),
        })
    }

    /// Copy of the current settings
    pub async fn snapshot(&self) -> CrossfadeSettings {
        self.current.read().await.clone()
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<CrossfadeSettings> {
        self.update(|s| s.enabled = enabled).await
    }

    /// Set the transition length; values outside 1-15 are rejected
    pub async fn set_duration(&self, duration_secs: u32) -> Result<CrossfadeSettings> {
        self.update(|s| s.duration_secs = duration_secs).await
    }

    pub async fn set_curve(&self, curve: CrossfadeCurve) -> Result<CrossfadeSettings> {
        self.update(|s| s.curve = curve).await
    }

    /// Set the curve by name; unknown names are rejected
    pub async fn set_curve_by_name(&self, name: &str) -> Result<CrossfadeSettings> {
        let curve = CrossfadeCurve::from_str(name).ok_or_else(|| {
            Error::SettingsValidation(format!("Unknown crossfade curve: {}", name))
        })?;
        self.set_curve(curve).await
    }

    pub async fn set_min_track_length(&self, secs: u32) -> Result<CrossfadeSettings> {
        self.update(|s| s.min_track_length_secs = secs).await
    }

    pub async fn set_dj_flags(&self, flags: DjFlags) -> Result<CrossfadeSettings> {
        self.update(|s| s.dj = flags).await
    }

    pub async fn set_auto_gain(&self, auto_gain: bool) -> Result<CrossfadeSettings> {
        self.update(|s| s.auto_gain = auto_gain).await
    }

    pub async fn set_eq_crossfade(&self, eq_crossfade: bool) -> Result<CrossfadeSettings> {
        self.update(|s| s.eq_crossfade = eq_crossfade).await
    }

    /// Switch the curve to DJ, or back to the curve used before
    ///
    /// Returns true if DJ mode is now on.
    pub async fn toggle_dj_mode(&self) -> Result<bool> {
        let mut previous = self.previous_curve.lock().await;
        let current = self.snapshot().await.curve;

        let (next, remember) = if current.is_dj() {
            (previous.unwrap_or(CrossfadeCurve::Linear), None)
        } else {
            (CrossfadeCurve::Dj, Some(current))
        };

        self.set_curve(next).await?;
        *previous = remember;
        Ok(next.is_dj())
    }

    /// Apply a mutation: validate, persist, then swap in
    async fn update<F>(&self, mutate: F) -> Result<CrossfadeSettings>
    where
        F: FnOnce(&mut CrossfadeSettings),
    {
        let _guard = self.write_lock.lock().await;

        let mut candidate = self.current.read().await.clone();
        mutate(&mut candidate);
        candidate.validate()?;

        self.store.save(&candidate).await?;
        *self.current.write().await = candidate.clone();

        info!(
            "Crossfade settings updated: enabled={}, duration={}s, curve={}, min_length={}s",
            candidate.enabled, candidate.duration_secs, candidate.curve, candidate.min_track_length_secs
        );
        Ok(candidate)
    }
}

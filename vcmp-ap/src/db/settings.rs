//! Settings database access
//!
//! Read/write crossfade settings from the settings table (key-value store).
//! All settings are global/process-wide.

use crate::crossfade::settings::{CrossfadeSettings, DjFlags, SettingsStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{debug, warn};
use vcmp_common::CrossfadeCurve;

pub const KEY_ENABLED: &str = "crossfade_enabled";
pub const KEY_DURATION: &str = "crossfade_duration_secs";
pub const KEY_CURVE: &str = "crossfade_curve";
pub const KEY_MIN_TRACK_LENGTH: &str = "crossfade_min_track_length_secs";
pub const KEY_DJ_LOW_CUT: &str = "crossfade_dj_low_cut";
pub const KEY_DJ_HIGH_BOOST: &str = "crossfade_dj_high_boost";
pub const KEY_DJ_STEREO_SPREAD: &str = "crossfade_dj_stereo_spread";
pub const KEY_AUTO_GAIN: &str = "crossfade_auto_gain";
pub const KEY_EQ_CROSSFADE: &str = "crossfade_eq_crossfade";

/// Flatten settings into the stored key/value form
pub(crate) fn settings_to_pairs(settings: &CrossfadeSettings) -> Vec<(&'static str, String)> {
    vec![
        (KEY_ENABLED, settings.enabled.to_string()),
        (KEY_DURATION, settings.duration_secs.to_string()),
        (KEY_CURVE, settings.curve.to_db_string().to_string()),
        (KEY_MIN_TRACK_LENGTH, settings.min_track_length_secs.to_string()),
        (KEY_DJ_LOW_CUT, settings.dj.low_cut.to_string()),
        (KEY_DJ_HIGH_BOOST, settings.dj.high_boost.to_string()),
        (KEY_DJ_STEREO_SPREAD, settings.dj.stereo_spread.to_string()),
        (KEY_AUTO_GAIN, settings.auto_gain.to_string()),
        (KEY_EQ_CROSSFADE, settings.eq_crossfade.to_string()),
    ]
}

/// Generic setting getter
///
/// Returns None if key doesn't exist in database.
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Read one key, falling back to `default` when absent or unparseable
async fn get_or_default<T: FromStr + ToString>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T> {
    match get_setting::<T>(db, key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(default),
        Err(Error::Config(msg)) => {
            warn!("{}; using default {}", msg, default.to_string());
            Ok(default)
        }
        Err(e) => Err(e),
    }
}

/// [`SettingsStore`] backed by the SQLite settings table
#[derive(Clone)]
pub struct SqliteSettingsStore {
    db: Pool<Sqlite>,
}

impl SqliteSettingsStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn load(&self) -> Result<CrossfadeSettings> {
        let defaults = CrossfadeSettings::default();
        let db = &self.db;

        let curve_name = get_or_default(db, KEY_CURVE, defaults.curve.to_db_string().to_string()).await?;
        let curve = CrossfadeCurve::from_str(&curve_name).unwrap_or_else(|| {
            warn!("Unknown stored crossfade curve '{}'; using {}", curve_name, defaults.curve);
            defaults.curve
        });

        let mut settings = CrossfadeSettings {
            enabled: get_or_default(db, KEY_ENABLED, defaults.enabled).await?,
            duration_secs: get_or_default(db, KEY_DURATION, defaults.duration_secs).await?,
            curve,
            min_track_length_secs: get_or_default(
                db,
                KEY_MIN_TRACK_LENGTH,
                defaults.min_track_length_secs,
            )
            .await?,
            dj: DjFlags {
                low_cut: get_or_default(db, KEY_DJ_LOW_CUT, defaults.dj.low_cut).await?,
                high_boost: get_or_default(db, KEY_DJ_HIGH_BOOST, defaults.dj.high_boost).await?,
                stereo_spread: get_or_default(db, KEY_DJ_STEREO_SPREAD, defaults.dj.stereo_spread)
                    .await?,
            },
            auto_gain: get_or_default(db, KEY_AUTO_GAIN, defaults.auto_gain).await?,
            eq_crossfade: get_or_default(db, KEY_EQ_CROSSFADE, defaults.eq_crossfade).await?,
        };

        // Out-of-range values written by hand are clamped rather than refused
        if settings.validate().is_err() {
            warn!(
                "Stored crossfade settings out of range (duration={}s, min_length={}s); clamping",
                settings.duration_secs, settings.min_track_length_secs
            );
            settings.duration_secs = settings.duration_secs.clamp(
                crate::crossfade::settings::MIN_DURATION_SECS,
                crate::crossfade::settings::MAX_DURATION_SECS,
            );
            settings.min_track_length_secs = settings
                .min_track_length_secs
                .min(crate::crossfade::settings::MAX_MIN_TRACK_LENGTH_SECS);
        }

        debug!("Loaded crossfade settings from database: {:?}", settings);
        Ok(settings)
    }

    async fn save(&self, settings: &CrossfadeSettings) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for (key, value) in settings_to_pairs(settings) {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value)
                VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Persisted crossfade settings");
        Ok(())
    }
}

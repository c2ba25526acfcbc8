//! Settings Persistence Tests
//!
//! Crossfade settings survive a restart: mutations made through
//! SharedSettings are visible to a fresh load from the same database file.

use std::sync::Arc;
use tempfile::TempDir;
use vcmp_common::CrossfadeCurve;

use vcmp_ap::crossfade::{DjFlags, SettingsStore, SharedSettings};
use vcmp_ap::db::{self, SqliteSettingsStore};
use vcmp_ap::Error;

async fn open(dir: &TempDir) -> SharedSettings {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("vcmp.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::initialize_database(&pool).await.unwrap();
    let store: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::new(pool));
    SharedSettings::load(store).await.unwrap()
}

#[tokio::test]
async fn test_fresh_database_has_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = open(&dir).await.snapshot().await;

    assert!(settings.enabled);
    assert_eq!(settings.duration_secs, 5);
    assert_eq!(settings.curve, CrossfadeCurve::Dj);
    assert_eq!(settings.min_track_length_secs, 15);
    assert_eq!(settings.dj, DjFlags::default());
    assert!(settings.auto_gain);
    assert!(settings.eq_crossfade);
}

#[tokio::test]
async fn test_mutations_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let settings = open(&dir).await;
        settings.set_enabled(false).await.unwrap();
        settings.set_duration(12).await.unwrap();
        settings.set_curve_by_name("logarithmic").await.unwrap();
        settings.set_min_track_length(45).await.unwrap();
        settings
            .set_dj_flags(DjFlags {
                low_cut: false,
                high_boost: true,
                stereo_spread: false,
            })
            .await
            .unwrap();
        settings.set_auto_gain(false).await.unwrap();
    }

    let reloaded = open(&dir).await.snapshot().await;
    assert!(!reloaded.enabled);
    assert_eq!(reloaded.duration_secs, 12);
    assert_eq!(reloaded.curve, CrossfadeCurve::Logarithmic);
    assert_eq!(reloaded.min_track_length_secs, 45);
    assert!(!reloaded.dj.low_cut);
    assert!(!reloaded.dj.stereo_spread);
    assert!(!reloaded.auto_gain);
    assert!(reloaded.eq_crossfade);
}

#[tokio::test]
async fn test_rejected_mutation_is_not_persisted() {
    let dir = TempDir::new().unwrap();
    {
        let settings = open(&dir).await;
        assert!(matches!(
            settings.set_duration(16).await,
            Err(Error::SettingsValidation(_))
        ));
        assert!(matches!(
            settings.set_curve_by_name("wobbly").await,
            Err(Error::SettingsValidation(_))
        ));
    }

    let reloaded = open(&dir).await.snapshot().await;
    assert_eq!(reloaded.duration_secs, 5);
    assert_eq!(reloaded.curve, CrossfadeCurve::Dj);
}

#[tokio::test]
async fn test_toggle_dj_mode_round_trip() {
    let dir = TempDir::new().unwrap();
    let settings = open(&dir).await;
    settings.set_curve(CrossfadeCurve::Exponential).await.unwrap();

    assert!(settings.toggle_dj_mode().await.unwrap());
    assert_eq!(open(&dir).await.snapshot().await.curve, CrossfadeCurve::Dj);

    assert!(!settings.toggle_dj_mode().await.unwrap());
    assert_eq!(
        open(&dir).await.snapshot().await.curve,
        CrossfadeCurve::Exponential
    );
}

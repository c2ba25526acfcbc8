//! Configuration management for vcmp-ap
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: paths, external tool locations, timer lengths, logging.
//!    Static for the life of the process.
//! 2. **Database runtime**: crossfade settings in the `settings` table, see
//!    [`crate::crossfade::settings`]. Mutable at runtime through validated setters.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--config, --output)
//! 2. Environment variables (VCMP_CONFIG, VCMP_OUTPUT)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use vcmp_common::config::{default_data_dir, ensure_dir, load_toml_config, LoggingConfig};

use crate::error::Result;

/// Bootstrap configuration loaded from TOML file
///
/// Every key is optional; a missing file yields the built-in defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Data directory (settings database lives here unless overridden)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding transient (downloaded) track files
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// SQLite database file for durable settings
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Decoder executable
    #[serde(default)]
    pub ffmpeg_path: Option<String>,

    /// Duration probe executable
    #[serde(default)]
    pub ffprobe_path: Option<String>,

    /// Duration assumed when probing fails (seconds)
    #[serde(default)]
    pub avg_track_length_secs: Option<f64>,

    /// Delay before an unattended connection is released (seconds)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Delay between end of playback and transient file removal (seconds)
    #[serde(default)]
    pub cleanup_grace_secs: Option<u64>,

    /// Period of the temp directory sweep (seconds)
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Age after which the sweep removes a temp file (seconds)
    #[serde(default)]
    pub temp_max_age_secs: Option<u64>,

    /// PCM sink for the local transport: a file path or "-" for stdout
    #[serde(default)]
    pub output: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolved engine configuration
///
/// All values concrete; built from [`TomlConfig`] plus defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub database_path: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Fallback duration for failed probes
    pub avg_track_length: Duration,
    /// Idle teardown delay
    pub idle_timeout: Duration,
    /// Grace delay before transient file removal
    pub cleanup_grace: Duration,
    /// Sweep period
    pub sweep_interval: Duration,
    /// Sweep age threshold
    pub temp_max_age: Duration,
    pub output: String,
    pub log_level: String,
}

pub const DEFAULT_AVG_TRACK_LENGTH_SECS: f64 = 30.0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5 * 60;
pub const DEFAULT_CLEANUP_GRACE_SECS: u64 = 5;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30 * 60;
pub const DEFAULT_TEMP_MAX_AGE_SECS: u64 = 60 * 60;

impl EngineConfig {
    /// Load the TOML file (if any) and resolve defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let toml_config: TomlConfig = load_toml_config(path)?;
        Ok(Self::from_toml(toml_config))
    }

    /// Resolve a parsed TOML config against built-in defaults
    pub fn from_toml(file: TomlConfig) -> Self {
        let data_dir = file.data_dir.unwrap_or_else(default_data_dir);
        let temp_dir = file.temp_dir.unwrap_or_else(|| data_dir.join("temp"));
        let database_path = file
            .database_path
            .unwrap_or_else(|| data_dir.join("vcmp.db"));

        let avg_secs = file
            .avg_track_length_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(DEFAULT_AVG_TRACK_LENGTH_SECS);

        Self {
            data_dir,
            temp_dir,
            database_path,
            ffmpeg_path: file.ffmpeg_path.unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: file.ffprobe_path.unwrap_or_else(|| "ffprobe".to_string()),
            avg_track_length: Duration::from_secs_f64(avg_secs),
            idle_timeout: Duration::from_secs(
                file.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
            cleanup_grace: Duration::from_secs(
                file.cleanup_grace_secs.unwrap_or(DEFAULT_CLEANUP_GRACE_SECS),
            ),
            sweep_interval: Duration::from_secs(
                file.sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                    .max(1),
            ),
            temp_max_age: Duration::from_secs(
                file.temp_max_age_secs.unwrap_or(DEFAULT_TEMP_MAX_AGE_SECS),
            ),
            output: file.output.unwrap_or_else(|| "-".to_string()),
            log_level: file.logging.level,
        }
    }

    /// Create the data and temp directories
    pub fn ensure_dirs(&self) -> Result<()> {
        ensure_dir(&self.data_dir)?;
        ensure_dir(&self.temp_dir)?;
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }
        info!(
            "Data dir: {}, temp dir: {}",
            self.data_dir.display(),
            self.temp_dir.display()
        );
        Ok(())
    }

    /// SQLite connection URL for the settings database
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path.display())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default())
    }
}

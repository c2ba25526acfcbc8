//! Audio Player (vcmp-ap) - Main entry point
//!
//! Plays files through the bundled local transport (PCM to a file or stdout)
//! and manages the durable crossfade settings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};
use vcmp_common::config::resolve_config_path;
use vcmp_common::events::{EventBus, VcmpEvent};
use vcmp_common::FilterPreset;

use vcmp_ap::announce::AnnounceHook;
use vcmp_ap::config::EngineConfig;
use vcmp_ap::crossfade::{SettingsStore, SharedSettings};
use vcmp_ap::db::{self, SqliteSettingsStore};
use vcmp_ap::janitor;
use vcmp_ap::transcode::FfmpegTranscoder;
use vcmp_ap::transport::LocalTransport;
use vcmp_ap::{EngineContext, SessionRegistry, TrackRequest};

/// Session id used by the command line player
const LOCAL_SESSION: &str = "local";

/// Command-line arguments for vcmp-ap
#[derive(Parser, Debug)]
#[command(name = "vcmp-ap")]
#[command(about = "Queued audio player with crossfading")]
#[command(version)]
struct Args {
    /// Bootstrap configuration file
    #[arg(short, long, env = "VCMP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// PCM sink: a file path or "-" for stdout
    #[arg(short, long, env = "VCMP_OUTPUT", global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue files and play them to the end
    Play {
        /// Audio files, played in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Filter preset applied to every file
        #[arg(long)]
        filter: Option<String>,

        /// Speed factor for speed-bearing presets
        #[arg(long, default_value_t = 1.0)]
        speed: f64,

        /// Repeat the current track
        #[arg(long = "loop")]
        looping: bool,

        /// Shuffle the queue before playing
        #[arg(long)]
        shuffle: bool,

        /// Delete the files after they have played
        #[arg(long)]
        transient: bool,
    },

    /// Show or change crossfade settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Enable,
    Disable,
    /// Transition length in seconds (1-15)
    Duration { secs: u32 },
    /// Curve preset by name
    Curve { name: String },
    /// Minimum track length for crossfading, in seconds
    MinLength { secs: u32 },
    /// Switch to or from the dj curve
    ToggleDj,
}

/// Log filter in effect until the config file has been read
///
/// `RUST_LOG` wins when set and is never replaced; returns whether it was used.
fn bootstrap_filter() -> (EnvFilter, bool) {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(configured_filter("info")), false),
    }
}

fn configured_filter(level: &str) -> String {
    format!("vcmp_ap={},vcmp_common=info", level)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing before the config loader starts logging
    let (filter, from_env) = bootstrap_filter();
    let (filter, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = resolve_config_path(args.config.as_deref(), "VCMP_CONFIG");
    let mut config =
        EngineConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(output) = args.output {
        config.output = output;
    }
    if !from_env {
        filter_handle
            .reload(EnvFilter::new(configured_filter(&config.log_level)))
            .context("Failed to apply configured log level")?;
    }

    info!("Starting VCMP Audio Player");
    config.ensure_dirs().context("Failed to create data directories")?;

    let pool = db::connect(&config.database_url())
        .await
        .context("Failed to open settings database")?;
    db::initialize_database(&pool)
        .await
        .context("Failed to initialize settings database")?;
    let store: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::new(pool));
    let settings = SharedSettings::load(store)
        .await
        .context("Failed to load crossfade settings")?;

    match args.command {
        Commands::Settings { action } => run_settings(&settings, action).await,
        Commands::Play {
            files,
            filter,
            speed,
            looping,
            shuffle,
            transient,
        } => {
            let filter = FilterPreset::parse(filter.as_deref().unwrap_or("none"))
                .context("Invalid filter preset")?;
            let mut tracks = Vec::with_capacity(files.len());
            for file in files {
                let name = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.display().to_string());
                let track = TrackRequest::new(name, file, "cli")
                    .with_filter(filter)
                    .with_speed(speed)
                    .context("Invalid speed")?
                    .transient(transient);
                tracks.push(track);
            }
            run_play(config, settings, tracks, looping, shuffle).await
        }
    }
}

async fn run_settings(settings: &SharedSettings, action: SettingsAction) -> Result<()> {
    let updated = match action {
        SettingsAction::Show => settings.snapshot().await,
        SettingsAction::Enable => settings.set_enabled(true).await?,
        SettingsAction::Disable => settings.set_enabled(false).await?,
        SettingsAction::Duration { secs } => settings.set_duration(secs).await?,
        SettingsAction::Curve { name } => settings.set_curve_by_name(&name).await?,
        SettingsAction::MinLength { secs } => settings.set_min_track_length(secs).await?,
        SettingsAction::ToggleDj => {
            let dj = settings.toggle_dj_mode().await?;
            info!("DJ mode {}", if dj { "on" } else { "off" });
            settings.snapshot().await
        }
    };
    println!("{}", serde_json::to_string_pretty(&updated)?);
    Ok(())
}

async fn run_play(
    config: EngineConfig,
    settings: SharedSettings,
    tracks: Vec<TrackRequest>,
    looping: bool,
    shuffle: bool,
) -> Result<()> {
    let bus = EventBus::new(100);
    let mut events = bus.subscribe();
    let announcer: Arc<dyn AnnounceHook> = Arc::new(bus.clone());

    let sweeper = janitor::spawn_sweeper(
        config.temp_dir.clone(),
        config.sweep_interval,
        config.temp_max_age,
    );

    let ctx = EngineContext::new(
        &config,
        Arc::new(LocalTransport::new(config.output.clone())),
        Arc::new(FfmpegTranscoder::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        )),
        settings,
        announcer,
    );
    let registry = SessionRegistry::new(ctx);
    let session = registry.get_or_create(LOCAL_SESSION).await;

    let mut tracks = tracks.into_iter();
    let Some(first) = tracks.next() else {
        bail!("No files to play");
    };
    session.set_looping(looping).await?;
    let rest: Vec<TrackRequest> = tracks.collect();
    session.enqueue(first).await.context("Failed to start playback")?;
    for track in rest {
        session.enqueue(track).await?;
    }
    if shuffle {
        session.shuffle().await?;
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(VcmpEvent::TrackChanged { track, crossfade_secs, .. }) => match crossfade_secs {
                    Some(secs) => info!("Now playing: {} (crossfaded over {}s)", track.name, secs),
                    None => info!("Now playing: {}", track.name),
                },
                Ok(VcmpEvent::Error { kind, message, .. }) => warn!("{:?}: {}", kind, message),
                Ok(VcmpEvent::QueueFinished { .. }) => {
                    info!("Queue finished");
                    break;
                }
                Ok(VcmpEvent::IdleDisconnected { .. }) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut shutdown => break,
        }
    }

    registry.shutdown().await;
    sweeper.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

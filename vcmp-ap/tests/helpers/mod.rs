//! Test helper modules for VCMP Audio Player integration tests
//!
//! Provides scripted stand-ins for the engine's collaborators:
//! - MockTransport: records joins, hands out MockPlayers, lets tests inject
//!   player and connection notifications
//! - ScriptedTranscoder: per-path durations and failures, records decodes
//! - RecordingAnnouncer: keeps every announcement
//! - MemoryStore: settings store without a database

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use vcmp_common::events::{ErrorKind, VcmpEvent};
use vcmp_common::{CrossfadeCurve, FilterPreset};

use vcmp_ap::announce::AnnounceHook;
use vcmp_ap::crossfade::{CrossfadeSettings, SettingsStore, SharedSettings};
use vcmp_ap::janitor::Janitor;
use vcmp_ap::transcode::{DecodedStream, FadeDirection, FadeSpec, Transcoder};
use vcmp_ap::transport::{
    AudioPlayer, ConnectionEvent, CreatedPlayer, Joined, PlayerEvent, VoiceConnection,
    VoiceTransport,
};
use vcmp_ap::{EngineContext, Error, Result, SessionRegistry, TrackRequest};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const AVG_TRACK_LENGTH: Duration = Duration::from_secs(30);

// ----------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------

pub struct MockPlayer {
    pub index: usize,
    events: mpsc::UnboundedSender<PlayerEvent>,
    volume_control: bool,
    /// Labels of every stream handed to `play`, in order
    plays: Mutex<Vec<String>>,
    started_at: Mutex<Option<Instant>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    volumes: Mutex<Vec<f32>>,
}

impl MockPlayer {
    /// End the current stream naturally
    pub fn finish(&self) {
        let _ = self.events.send(PlayerEvent::Idle);
    }

    /// Fail the current stream
    pub fn fail(&self, message: &str) {
        let _ = self.events.send(PlayerEvent::Error(message.to_string()));
    }

    pub fn plays(&self) -> Vec<String> {
        self.plays.lock().unwrap().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.volumes.lock().unwrap().clone()
    }
}

impl AudioPlayer for MockPlayer {
    fn play(&self, stream: DecodedStream) -> Result<()> {
        self.plays.lock().unwrap().push(stream.label().to_string());
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        !self.paused.swap(true, Ordering::SeqCst)
    }

    fn unpause(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    fn stop(&self) {
        let was_playing = !self.stopped.swap(true, Ordering::SeqCst);
        if was_playing && self.started_at.lock().unwrap().is_some() {
            let _ = self.events.send(PlayerEvent::Idle);
        }
    }

    fn supports_volume(&self) -> bool {
        self.volume_control
    }

    fn set_volume(&self, volume: f32) {
        self.volumes.lock().unwrap().push(volume);
    }

    fn position(&self) -> Duration {
        self.started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

pub struct MockConnection {
    pub index: usize,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    subscribed: AtomicUsize,
    destroyed: AtomicBool,
    refuse_subscribe: AtomicBool,
}

impl MockConnection {
    /// Make later `subscribe` calls fail without any connection notification
    pub fn refuse_subscribe(&self) {
        self.refuse_subscribe.store(true, Ordering::SeqCst);
    }

    /// Simulate the platform dropping the connection
    pub fn disconnect(&self, reason: &str) {
        let _ = self
            .events
            .send(ConnectionEvent::Disconnected(reason.to_string()));
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn subscribed(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }
}

impl VoiceConnection for MockConnection {
    fn subscribe(&self, _player: Arc<dyn AudioPlayer>) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Transport("connection destroyed".into()));
        }
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(Error::Transport("voice gateway rejected player".into()));
        }
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unsubscribe(&self, _player: &Arc<dyn AudioPlayer>) {
        let _ = self
            .subscribed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ConnectionEvent::Destroyed);
        }
    }
}

#[derive(Default)]
pub struct MockTransport {
    pub fail_join: AtomicBool,
    /// Players created without live volume control
    pub no_volume: AtomicBool,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    players: Mutex<Vec<Arc<MockPlayer>>>,
}

impl MockTransport {
    pub fn joins(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn player(&self, index: usize) -> Arc<MockPlayer> {
        self.players.lock().unwrap()[index].clone()
    }

    pub fn last_player(&self) -> Arc<MockPlayer> {
        self.players
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no player created")
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn join(&self, destination: &str) -> Result<Joined> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("cannot join {}", destination)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connections = self.connections.lock().unwrap();
        let connection = Arc::new(MockConnection {
            index: connections.len(),
            events: tx,
            subscribed: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            refuse_subscribe: AtomicBool::new(false),
        });
        connections.push(connection.clone());
        Ok(Joined {
            connection,
            events: rx,
        })
    }

    fn create_player(&self) -> CreatedPlayer {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut players = self.players.lock().unwrap();
        let player = Arc::new(MockPlayer {
            index: players.len(),
            events: tx,
            volume_control: !self.no_volume.load(Ordering::SeqCst),
            plays: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            volumes: Mutex::new(Vec::new()),
        });
        players.push(player.clone());
        CreatedPlayer {
            player,
            events: rx,
        }
    }
}

// ----------------------------------------------------------------------
// Transcoder
// ----------------------------------------------------------------------

/// One recorded decode request
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeCall {
    Plain {
        name: String,
        filter: Option<FilterPreset>,
    },
    Faded {
        name: String,
        fade: FadeSpec,
    },
}

impl DecodeCall {
    pub fn name(&self) -> &str {
        match self {
            DecodeCall::Plain { name, .. } | DecodeCall::Faded { name, .. } => name,
        }
    }
}

/// File stem used as track name and stream label
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct ScriptedTranscoder {
    durations: Mutex<HashMap<PathBuf, f64>>,
    failing: Mutex<HashSet<PathBuf>>,
    decodes: Mutex<Vec<DecodeCall>>,
    probes: AtomicUsize,
}

impl ScriptedTranscoder {
    pub fn set_duration(&self, path: impl Into<PathBuf>, secs: f64) {
        self.durations.lock().unwrap().insert(path.into(), secs);
    }

    /// Every decode of `path` fails from now on
    pub fn fail_decode(&self, path: impl Into<PathBuf>) {
        self.failing.lock().unwrap().insert(path.into());
    }

    pub fn decodes(&self) -> Vec<DecodeCall> {
        self.decodes.lock().unwrap().clone()
    }

    pub fn faded(&self, direction: FadeDirection) -> Vec<DecodeCall> {
        self.decodes()
            .into_iter()
            .filter(|d| matches!(d, DecodeCall::Faded { fade, .. } if fade.direction == direction))
            .collect()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn check(&self, source: &Path) -> Result<()> {
        if self.failing.lock().unwrap().contains(source) {
            return Err(Error::Pipeline(format!("cannot decode {}", source.display())));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn decode(
        &self,
        source: &Path,
        filter: Option<FilterPreset>,
        _speed: f64,
    ) -> Result<DecodedStream> {
        self.check(source)?;
        let name = stem(source);
        self.decodes.lock().unwrap().push(DecodeCall::Plain {
            name: name.clone(),
            filter,
        });
        Ok(DecodedStream::from_reader(tokio::io::empty(), name))
    }

    async fn decode_faded(&self, source: &Path, fade: &FadeSpec) -> Result<DecodedStream> {
        self.check(source)?;
        let name = stem(source);
        self.decodes.lock().unwrap().push(DecodeCall::Faded {
            name: name.clone(),
            fade: fade.clone(),
        });
        let label = match fade.direction {
            FadeDirection::In => format!("{}:in", name),
            FadeDirection::Out => format!("{}:out", name),
        };
        Ok(DecodedStream::from_reader(tokio::io::empty(), label))
    }

    async fn probe_duration(&self, source: &Path) -> Result<f64> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.durations
            .lock()
            .unwrap()
            .get(source)
            .copied()
            .ok_or_else(|| Error::Probe(format!("no duration for {}", source.display())))
    }

    async fn estimate_peak(&self, _source: &Path) -> Result<f32> {
        Ok(0.5)
    }
}

// ----------------------------------------------------------------------
// Announcements and settings
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAnnouncer {
    events: Mutex<Vec<VcmpEvent>>,
}

impl RecordingAnnouncer {
    pub fn events(&self) -> Vec<VcmpEvent> {
        self.events.lock().unwrap().clone()
    }

    /// (track name, crossfade seconds) for every TrackChanged
    pub fn track_changes(&self) -> Vec<(String, Option<u32>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                VcmpEvent::TrackChanged {
                    track,
                    crossfade_secs,
                    ..
                } => Some((track.name, crossfade_secs)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                VcmpEvent::Error { kind, message, .. } => Some((kind, message)),
                _ => None,
            })
            .collect()
    }

    pub fn queue_finished(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, VcmpEvent::QueueFinished { .. }))
            .count()
    }

    pub fn idle_disconnects(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, VcmpEvent::IdleDisconnected { .. }))
            .count()
    }
}

impl AnnounceHook for RecordingAnnouncer {
    fn announce(&self, event: VcmpEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<CrossfadeSettings>>,
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<CrossfadeSettings> {
        Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
    }

    async fn save(&self, settings: &CrossfadeSettings) -> Result<()> {
        *self.saved.lock().unwrap() = Some(settings.clone());
        Ok(())
    }
}

/// Plain-curve settings: no DJ extras, 5 second transitions, 15 second minimum
pub fn linear_settings() -> CrossfadeSettings {
    CrossfadeSettings {
        curve: CrossfadeCurve::Linear,
        ..Default::default()
    }
}

// ----------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------

pub struct TestEngine {
    pub registry: SessionRegistry,
    pub transport: Arc<MockTransport>,
    pub transcoder: Arc<ScriptedTranscoder>,
    pub announcer: Arc<RecordingAnnouncer>,
    pub settings: SharedSettings,
}

impl TestEngine {
    pub async fn new(settings: CrossfadeSettings) -> Self {
        Self::with_grace(settings, Duration::from_secs(5)).await
    }

    pub async fn with_grace(settings: CrossfadeSettings, cleanup_grace: Duration) -> Self {
        let store = Arc::new(MemoryStore::default());
        store.save(&settings).await.unwrap();
        let settings = SharedSettings::load(store).await.unwrap();

        let transport = Arc::new(MockTransport::default());
        let transcoder = Arc::new(ScriptedTranscoder::default());
        let announcer = Arc::new(RecordingAnnouncer::default());

        let ctx = EngineContext {
            transport: transport.clone(),
            transcoder: transcoder.clone(),
            settings: settings.clone(),
            announcer: announcer.clone(),
            janitor: Janitor::new(cleanup_grace),
            idle_timeout: IDLE_TIMEOUT,
            avg_track_length: AVG_TRACK_LENGTH,
        };

        Self {
            registry: SessionRegistry::new(ctx),
            transport,
            transcoder,
            announcer,
            settings,
        }
    }

    /// Track at `/music/<name>.ogg` with a scripted duration
    pub fn track(&self, name: &str, secs: f64) -> TrackRequest {
        let path = PathBuf::from(format!("/music/{}.ogg", name));
        self.transcoder.set_duration(path.clone(), secs);
        TrackRequest::new(name, path, "tester")
    }
}

/// Let every spawned task run until the runtime is idle
///
/// With a paused clock the 1 ms sleep only completes once nothing else is
/// runnable, so all queued messages and probes have been processed.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

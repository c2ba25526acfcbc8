//! Bundled transport writing mixed PCM to a file or stdout
//!
//! Each connection runs a mixer task that ticks every 20 ms, pulls one frame
//! from every subscribed player, sums them with saturation and writes the
//! result as s16le/48 kHz/stereo. Each player is fed by a pump task that
//! reads its decoded stream into a small bounded frame buffer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AudioPlayer, ConnectionEvent, CreatedPlayer, Joined, PlayerEvent, VoiceConnection,
    VoiceTransport,
};
use crate::error::{Error, Result};
use crate::transcode::{DecodedStream, BYTES_PER_FRAME, CHANNELS, SAMPLE_RATE};

/// Mixer tick
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Interleaved samples in one 20 ms frame
pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE as usize / 50) * CHANNELS as usize;

const FRAME_BYTES: usize = SAMPLES_PER_FRAME * BYTES_PER_FRAME / CHANNELS as usize;

/// Frames buffered ahead per player (one second)
const FRAME_BUFFER: usize = 50;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport whose connections all write to one PCM sink
#[derive(Debug, Clone)]
pub struct LocalTransport {
    output: String,
}

impl LocalTransport {
    /// `output` is a file path, or `-` for stdout
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }

    async fn open_sink(&self) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
        if self.output == "-" {
            return Ok(Box::new(tokio::io::stdout()));
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output)
            .await
            .map_err(|e| Error::Transport(format!("cannot open {}: {}", self.output, e)))?;
        Ok(Box::new(file))
    }
}

#[async_trait]
impl VoiceTransport for LocalTransport {
    async fn join(&self, destination: &str) -> Result<Joined> {
        let sink = self.open_sink().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ConnectionInner {
            destination: destination.to_string(),
            players: Mutex::new(Vec::new()),
            events: events_tx,
            destroyed: AtomicBool::new(false),
            mixer: Mutex::new(None),
        });
        let handle = tokio::spawn(mix_loop(inner.clone(), sink));
        *lock(&inner.mixer) = Some(handle);

        info!("Joined {} (output: {})", destination, self.output);
        Ok(Joined {
            connection: Arc::new(LocalConnection { inner }),
            events: events_rx,
        })
    }

    fn create_player(&self) -> CreatedPlayer {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let player = Arc::new(LocalPlayer {
            state: Mutex::new(PlayerState::default()),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            frames_played: AtomicU64::new(0),
            events: events_tx,
        });
        CreatedPlayer {
            player,
            events: events_rx,
        }
    }
}

struct ConnectionInner {
    destination: String,
    players: Mutex<Vec<Arc<dyn AudioPlayer>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    destroyed: AtomicBool,
    mixer: Mutex<Option<JoinHandle<()>>>,
}

/// Connection created by [`LocalTransport`]
pub struct LocalConnection {
    inner: Arc<ConnectionInner>,
}

fn same_player(a: &Arc<dyn AudioPlayer>, b: &Arc<dyn AudioPlayer>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl VoiceConnection for LocalConnection {
    fn subscribe(&self, player: Arc<dyn AudioPlayer>) -> Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!(
                "connection to {} already destroyed",
                self.inner.destination
            )));
        }
        let mut players = lock(&self.inner.players);
        if !players.iter().any(|p| same_player(p, &player)) {
            players.push(player);
        }
        Ok(())
    }

    fn unsubscribe(&self, player: &Arc<dyn AudioPlayer>) {
        lock(&self.inner.players).retain(|p| !same_player(p, player));
    }

    fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.inner.mixer).take() {
            handle.abort();
        }
        lock(&self.inner.players).clear();
        let _ = self.inner.events.send(ConnectionEvent::Destroyed);
        info!("Connection to {} destroyed", self.inner.destination);
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn mix_loop(inner: Arc<ConnectionInner>, mut sink: Box<dyn AsyncWrite + Send + Unpin>) {
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut mix = vec![0i32; SAMPLES_PER_FRAME];
    let mut out = Vec::with_capacity(FRAME_BYTES);

    loop {
        ticker.tick().await;
        if inner.destroyed.load(Ordering::SeqCst) {
            return;
        }

        mix.iter_mut().for_each(|s| *s = 0);
        let players: Vec<_> = lock(&inner.players).clone();
        let mut any = false;
        for player in players {
            if let Some(frame) = player.read_frame() {
                any = true;
                for (acc, sample) in mix.iter_mut().zip(frame.iter()) {
                    *acc += *sample as i32;
                }
            }
        }
        if !any {
            continue;
        }

        out.clear();
        for sample in &mix {
            let clamped = (*sample).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out.extend_from_slice(&clamped.to_le_bytes());
        }

        let written = async {
            sink.write_all(&out).await?;
            sink.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("Output for {} failed: {}", inner.destination, e);
            inner.destroyed.store(true, Ordering::SeqCst);
            let _ = inner
                .events
                .send(ConnectionEvent::Disconnected(format!("output write failed: {}", e)));
            return;
        }
    }
}

#[derive(Default)]
struct PlayerState {
    frames: Option<mpsc::Receiver<Vec<i16>>>,
    pump: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
    paused: bool,
}

/// Player created by [`LocalTransport`]
pub struct LocalPlayer {
    state: Mutex<PlayerState>,
    volume_bits: AtomicU32,
    frames_played: AtomicU64,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl LocalPlayer {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }
}

impl AudioPlayer for LocalPlayer {
    fn play(&self, stream: DecodedStream) -> Result<()> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let failure = Arc::new(Mutex::new(None));
        debug!("Local player starting {}", stream.label());
        let pump = tokio::spawn(pump_frames(stream, tx, failure.clone()));

        let mut state = lock(&self.state);
        if let Some(old) = state.pump.take() {
            old.abort();
        }
        state.frames = Some(rx);
        state.pump = Some(pump);
        state.failure = failure;
        state.paused = false;
        self.frames_played.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> bool {
        let mut state = lock(&self.state);
        if state.frames.is_none() || state.paused {
            return false;
        }
        state.paused = true;
        true
    }

    fn unpause(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.paused {
            return false;
        }
        state.paused = false;
        true
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        state.paused = false;
        if state.frames.take().is_some() {
            let _ = self.events.send(PlayerEvent::Idle);
        }
    }

    fn supports_volume(&self) -> bool {
        true
    }

    fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn position(&self) -> Duration {
        FRAME_DURATION * self.frames_played.load(Ordering::SeqCst) as u32
    }

    fn read_frame(&self) -> Option<Vec<i16>> {
        let mut state = lock(&self.state);
        if state.paused {
            return None;
        }
        let frames = state.frames.as_mut()?;
        match frames.try_recv() {
            Ok(mut frame) => {
                self.frames_played.fetch_add(1, Ordering::SeqCst);
                let volume = self.volume();
                if volume < 1.0 {
                    for sample in frame.iter_mut() {
                        *sample = (*sample as f32 * volume) as i16;
                    }
                }
                Some(frame)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                state.frames = None;
                state.pump = None;
                let event = match lock(&state.failure).take() {
                    Some(message) => PlayerEvent::Error(message),
                    None => PlayerEvent::Idle,
                };
                let _ = self.events.send(event);
                None
            }
        }
    }
}

async fn pump_frames(
    mut stream: DecodedStream,
    tx: mpsc::Sender<Vec<i16>>,
    failure: Arc<Mutex<Option<String>>>,
) {
    let mut buf = vec![0u8; FRAME_BYTES];
    loop {
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    *lock(&failure) = Some(format!("read from {} failed: {}", stream.label(), e));
                    return;
                }
            }
        }
        if filled == 0 {
            break;
        }

        let frame: Vec<i16> = buf[..filled - filled % 2]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        if tx.send(frame).await.is_err() {
            return;
        }
        if filled < buf.len() {
            break;
        }
    }

    if let Err(e) = stream.finish().await {
        *lock(&failure) = Some(e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> DecodedStream {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        DecodedStream::from_reader(std::io::Cursor::new(bytes), "test")
    }

    async fn drain(player: &LocalPlayer) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if let Some(frame) = player.read_frame() {
                frames.push(frame);
            } else if lock(&player.state).frames.is_none() {
                break;
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_player_emits_idle_at_end() {
        let transport = LocalTransport::new("-");
        let CreatedPlayer { player, mut events } = transport.create_player();

        player.play(pcm(&[1000; SAMPLES_PER_FRAME + 4])).unwrap();
        let mut frames = 0;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if player.read_frame().is_some() {
                frames += 1;
            }
            if let Ok(event) = events.try_recv() {
                assert_eq!(event, PlayerEvent::Idle);
                assert_eq!(frames, 2);
                assert_eq!(player.position(), FRAME_DURATION * 2);
                return;
            }
        }
        panic!("player never went idle");
    }

    #[tokio::test]
    async fn test_volume_scales_samples() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let player = LocalPlayer {
            state: Mutex::new(PlayerState::default()),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            frames_played: AtomicU64::new(0),
            events: tx,
        };
        player.set_volume(0.5);
        player.play(pcm(&[1000; 8])).unwrap();

        let frames = drain(&player).await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|s| *s == 500));
    }

    #[tokio::test]
    async fn test_paused_player_yields_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let player = LocalPlayer {
            state: Mutex::new(PlayerState::default()),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            frames_played: AtomicU64::new(0),
            events: tx,
        };
        assert!(!player.pause());
        player.play(pcm(&[1; 8])).unwrap();
        assert!(player.pause());
        tokio::task::yield_now().await;
        assert!(player.read_frame().is_none());
        assert!(player.unpause());

        player.stop();
        assert_eq!(rx.try_recv().unwrap(), PlayerEvent::Idle);
        // Stopping again is a no-op
        player.stop();
        assert!(rx.try_recv().is_err());
    }
}

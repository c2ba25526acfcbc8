//! Announcement events and the EventBus that carries them
//!
//! Every track change, queue exhaustion, idle disconnect and user-visible
//! error is published as a [`VcmpEvent`]. Rendering (chat embeds, console
//! output) happens in whatever subscribes; the playback engine only emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::filters::FilterPreset;

/// Display summary of a queued or playing track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Unique id assigned when the track was enqueued
    pub entry_id: Uuid,
    /// Display name
    pub name: String,
    /// Who asked for it
    pub requested_by: String,
    /// Filter preset, if any
    pub filter: Option<FilterPreset>,
    /// Speed factor (only meaningful for tempo presets)
    pub speed: f64,
    /// Backing file is removed after playback
    pub transient: bool,
}

/// Category of a user-visible error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Voice connection lost or could not be established
    Transport,
    /// Decode process failed to start or died mid-stream
    Pipeline,
    /// Duration probe failed (recovered with a fallback)
    Probe,
    /// Rejected settings change
    SettingsValidation,
    /// Transient file could not be removed
    ResourceCleanup,
}

/// VCMP event types
///
/// Serialized with an internal `type` tag so subscribers can forward them as
/// JSON without extra wrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VcmpEvent {
    /// A new track became current (ordinary start or crossfade promotion)
    TrackChanged {
        /// Session (channel) id
        session_id: String,
        /// Track now playing
        track: TrackInfo,
        /// Tracks still waiting
        queue_length: usize,
        /// Loop flag at the time of the change
        is_looping: bool,
        /// True while a crossfade transition is audible
        ///
        /// False on promotion: that transition has already ended.
        is_crossfading: bool,
        /// Crossfade length used to reach this track, if one was used
        crossfade_secs: Option<u32>,
        /// When the change happened
        timestamp: DateTime<Utc>,
    },

    /// Queue ran dry; the idle timer is now pending
    QueueFinished {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Connection released after the idle timeout
    IdleDisconnected {
        session_id: String,
        idle_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// User-visible error
    Error {
        session_id: String,
        kind: ErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl VcmpEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            VcmpEvent::TrackChanged { session_id, .. }
            | VcmpEvent::QueueFinished { session_id, .. }
            | VcmpEvent::IdleDisconnected { session_id, .. }
            | VcmpEvent::Error { session_id, .. } => session_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers, and dropped
/// receivers are cleaned up automatically.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VcmpEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VcmpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: VcmpEvent) -> Result<usize, broadcast::error::SendError<VcmpEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: VcmpEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

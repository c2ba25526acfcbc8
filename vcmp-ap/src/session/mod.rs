//! Playback sessions
//!
//! One session per destination channel. Each session is a task that owns its
//! queue, players, connection and timers, and processes one message at a
//! time from its inbox. [`SessionHandle`] is the only way in.

pub(crate) mod actor;
pub mod queue;
pub mod registry;
pub(crate) mod timers;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use vcmp_common::events::TrackInfo;

use crate::announce::AnnounceHook;
use crate::config::EngineConfig;
use crate::crossfade::{CrossfadePlan, SharedSettings};
use crate::error::{Error, Result};
use crate::janitor::Janitor;
use crate::transcode::Transcoder;
use crate::transport::VoiceTransport;

use actor::{SessionActor, SessionMsg};

pub use queue::{TrackQueue, TrackRequest};
pub use registry::{RegistryStats, SessionRegistry};

/// Shared collaborators every session uses
#[derive(Clone)]
pub struct EngineContext {
    pub transport: Arc<dyn VoiceTransport>,
    pub transcoder: Arc<dyn Transcoder>,
    pub settings: SharedSettings,
    pub announcer: Arc<dyn AnnounceHook>,
    pub janitor: Janitor,
    /// Delay before an idle connection is released
    pub idle_timeout: Duration,
    /// Duration assumed when a probe fails
    pub avg_track_length: Duration,
}

impl EngineContext {
    /// Context with timing taken from the engine config
    pub fn new(
        config: &EngineConfig,
        transport: Arc<dyn VoiceTransport>,
        transcoder: Arc<dyn Transcoder>,
        settings: SharedSettings,
        announcer: Arc<dyn AnnounceHook>,
    ) -> Self {
        Self {
            transport,
            transcoder,
            settings,
            announcer,
            janitor: Janitor::new(config.cleanup_grace),
            idle_timeout: config.idle_timeout,
            avg_track_length: config.avg_track_length,
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_crossfading: bool,
    pub is_looping: bool,
    pub queue_length: usize,
    pub current_track: Option<TrackInfo>,
    /// Plan for the pending or running transition
    pub crossfade_plan: Option<CrossfadePlan>,
    pub connected: bool,
}

/// Request to a session task
pub(crate) enum Command {
    Enqueue {
        track: TrackRequest,
        reply: oneshot::Sender<Result<usize>>,
    },
    Skip {
        reply: oneshot::Sender<Option<TrackInfo>>,
    },
    Reset {
        destroy_connection: bool,
        reply: oneshot::Sender<()>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    SetLooping {
        /// None toggles
        looping: Option<bool>,
        reply: oneshot::Sender<bool>,
    },
    Shuffle {
        reply: oneshot::Sender<usize>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    Remove {
        index: usize,
        reply: oneshot::Sender<Option<TrackInfo>>,
    },
    Queue {
        reply: oneshot::Sender<Vec<TrackInfo>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    inbox: mpsc::UnboundedSender<SessionMsg>,
}

impl SessionHandle {
    /// Start a session task
    pub(crate) fn spawn(id: &str, ctx: EngineContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = SessionActor::new(id.to_string(), ctx, tx.clone());
        tokio::spawn(actor.run(rx));
        info!("Session {} created", id);
        Self {
            id: Arc::from(id),
            inbox: tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(SessionMsg::Command(build(reply)))
            .map_err(|_| Error::SessionClosed(self.id.to_string()))?;
        rx.await
            .map_err(|_| Error::SessionClosed(self.id.to_string()))
    }

    /// Append a track; starts playback if nothing is playing
    ///
    /// Returns the track's queue position (0 = playing now).
    pub async fn enqueue(&self, track: TrackRequest) -> Result<usize> {
        self.request(|reply| Command::Enqueue { track, reply }).await?
    }

    /// Skip the current track; returns what was skipped
    pub async fn skip(&self) -> Result<Option<TrackInfo>> {
        self.request(|reply| Command::Skip { reply }).await
    }

    /// Stop playback, clear the queue and release the connection
    pub async fn stop(&self) -> Result<()> {
        self.reset(true).await
    }

    /// Stop playback and clear the queue, optionally keeping the connection
    pub async fn reset(&self, destroy_connection: bool) -> Result<()> {
        self.request(|reply| Command::Reset {
            destroy_connection,
            reply,
        })
        .await
    }

    pub async fn pause(&self) -> Result<bool> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<bool> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Set the loop flag; returns the new value
    pub async fn set_looping(&self, looping: bool) -> Result<bool> {
        self.request(|reply| Command::SetLooping {
            looping: Some(looping),
            reply,
        })
        .await
    }

    /// Flip the loop flag; returns the new value
    pub async fn toggle_looping(&self) -> Result<bool> {
        self.request(|reply| Command::SetLooping {
            looping: None,
            reply,
        })
        .await
    }

    /// Shuffle pending tracks; returns the queue length
    pub async fn shuffle(&self) -> Result<usize> {
        self.request(|reply| Command::Shuffle { reply }).await
    }

    /// Drop pending tracks; returns how many were removed
    pub async fn clear(&self) -> Result<usize> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Remove the pending track at `index` (0 = next up)
    pub async fn remove(&self, index: usize) -> Result<Option<TrackInfo>> {
        self.request(|reply| Command::Remove { index, reply }).await
    }

    /// Pending tracks in play order
    pub async fn queue(&self) -> Result<Vec<TrackInfo>> {
        self.request(|reply| Command::Queue { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Tear the session down and end its task
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(SessionMsg::Shutdown { reply })
            .map_err(|_| Error::SessionClosed(self.id.to_string()))?;
        rx.await
            .map_err(|_| Error::SessionClosed(self.id.to_string()))
    }
}

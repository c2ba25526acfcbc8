//! Voice transport seam
//!
//! A transport joins a destination and hands back a connection. Players are
//! created independently and attached to a connection with `subscribe`; a
//! connection plays whichever players are subscribed to it.
//!
//! Notifications flow back over unbounded channels handed out at creation
//! time. The session forwards them into its own inbox.

pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transcode::DecodedStream;

pub use local::LocalTransport;

/// Notification from a player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The stream ended or the player was stopped
    Idle,
    /// The stream failed mid-playback
    Error(String),
}

/// Notification from a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connection lost without being asked to
    Disconnected(String),
    /// Connection released by `destroy`
    Destroyed,
}

/// A playable sink for one decoded stream at a time
pub trait AudioPlayer: Send + Sync {
    /// Start playing `stream`, replacing any current stream without an Idle
    fn play(&self, stream: DecodedStream) -> Result<()>;

    /// Returns false if nothing was playing
    fn pause(&self) -> bool;

    /// Returns false if the player was not paused
    fn unpause(&self) -> bool;

    /// Stop and drop the current stream; emits Idle if something was playing
    fn stop(&self);

    /// True if `set_volume` changes the output live
    fn supports_volume(&self) -> bool;

    /// Live gain in [0, 1]
    fn set_volume(&self, volume: f32);

    /// Playback position of the current stream
    fn position(&self) -> Duration;

    /// Next 20 ms frame for a mixing connection, if one is ready
    ///
    /// Players that deliver audio some other way keep the default.
    fn read_frame(&self) -> Option<Vec<i16>> {
        None
    }
}

/// A joined destination
pub trait VoiceConnection: Send + Sync {
    /// Route a player's output through this connection
    fn subscribe(&self, player: Arc<dyn AudioPlayer>) -> Result<()>;

    /// Detach a player (no-op if not subscribed)
    fn unsubscribe(&self, player: &Arc<dyn AudioPlayer>);

    /// Release the connection; emits Destroyed
    fn destroy(&self);
}

/// Connection returned from a join, with its notification channel
pub struct Joined {
    pub connection: Arc<dyn VoiceConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Player returned from creation, with its notification channel
pub struct CreatedPlayer {
    pub player: Arc<dyn AudioPlayer>,
    pub events: mpsc::UnboundedReceiver<PlayerEvent>,
}

/// Factory for connections and players
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, destination: &str) -> Result<Joined>;

    fn create_player(&self) -> CreatedPlayer;
}

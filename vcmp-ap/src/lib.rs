//! # VCMP Audio Player Library (vcmp-ap)
//!
//! Per-channel queued playback engine with crossfading between consecutive
//! tracks.
//!
//! **Purpose:** Keep one playback session per destination channel, decode
//! tracks through an external transcoder, schedule and run crossfades, and
//! release idle connections.
//!
//! **Architecture:** Each session is a tokio task owning its queue, players,
//! connection and timers. The voice transport and the transcoder sit behind
//! traits so the engine runs against a real platform, the bundled local PCM
//! transport, or test doubles.

pub mod announce;
pub mod config;
pub mod crossfade;
pub mod db;
pub mod error;
pub mod janitor;
pub mod session;
pub mod transcode;
pub mod transport;

pub use error::{Error, Result};
pub use session::{EngineContext, SessionHandle, SessionRegistry, SessionStatus, TrackRequest};

//! Announce hook
//!
//! The engine reports track changes, queue exhaustion, idle disconnects and
//! user-visible errors through an [`AnnounceHook`]. Rendering is up to the
//! implementor.

use chrono::Utc;
use tracing::{info, warn};
use vcmp_common::events::{ErrorKind, EventBus, TrackInfo, VcmpEvent};

/// Receiver of session announcements
///
/// Called from the session task; implementations must not block.
pub trait AnnounceHook: Send + Sync {
    fn announce(&self, event: VcmpEvent);
}

impl AnnounceHook for EventBus {
    fn announce(&self, event: VcmpEvent) {
        self.emit_lossy(event);
    }
}

/// Hook that only writes announcements to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnnouncer;

impl AnnounceHook for LogAnnouncer {
    fn announce(&self, event: VcmpEvent) {
        match &event {
            VcmpEvent::Error {
                session_id,
                kind,
                message,
                ..
            } => warn!("[{}] {:?}: {}", session_id, kind, message),
            other => info!("[{}] {:?}", other.session_id(), other),
        }
    }
}

pub(crate) fn track_changed(
    session_id: &str,
    track: TrackInfo,
    queue_length: usize,
    is_looping: bool,
    is_crossfading: bool,
    crossfade_secs: Option<u32>,
) -> VcmpEvent {
    VcmpEvent::TrackChanged {
        session_id: session_id.to_string(),
        track,
        queue_length,
        is_looping,
        is_crossfading,
        crossfade_secs,
        timestamp: Utc::now(),
    }
}

pub(crate) fn queue_finished(session_id: &str) -> VcmpEvent {
    VcmpEvent::QueueFinished {
        session_id: session_id.to_string(),
        timestamp: Utc::now(),
    }
}

pub(crate) fn idle_disconnected(session_id: &str, idle_secs: u64) -> VcmpEvent {
    VcmpEvent::IdleDisconnected {
        session_id: session_id.to_string(),
        idle_secs,
        timestamp: Utc::now(),
    }
}

pub(crate) fn error(session_id: &str, kind: ErrorKind, message: impl Into<String>) -> VcmpEvent {
    VcmpEvent::Error {
        session_id: session_id.to_string(),
        kind,
        message: message.into(),
        timestamp: Utc::now(),
    }
}

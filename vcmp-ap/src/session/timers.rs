//! Tokened one-shot timers
//!
//! A timer is a spawned sleep that posts a message into the session inbox.
//! Dropping the timer aborts the sleep. A fire that raced with the drop still
//! carries its token, and the session ignores tokens it no longer holds.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::actor::SessionMsg;

/// Background task aborted when its owner goes away
#[derive(Debug)]
pub(crate) struct TaskGuard(pub(crate) JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Armed -> Active
    CrossfadeStart,
    /// Active -> Idle
    CrossfadeComplete,
    /// Queue exhausted -> release connection
    IdleTeardown,
}

#[derive(Debug)]
pub(crate) struct Timer {
    token: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    pub(crate) fn start(
        token: u64,
        delay: Duration,
        kind: TimerKind,
        inbox: mpsc::UnboundedSender<SessionMsg>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(SessionMsg::Timer { token, kind });
        });
        Self { token, handle }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

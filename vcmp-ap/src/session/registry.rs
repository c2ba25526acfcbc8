//! Session registry
//!
//! Maps channel ids to running sessions. Sessions are created on first use
//! and live until the registry shuts down; `reset` empties one without
//! removing it.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{EngineContext, SessionHandle};
use crate::error::Result;

/// Aggregate counters across all sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub active_sessions: usize,
    /// Pending tracks summed over every session
    pub total_queued: usize,
    pub playing_sessions: usize,
    pub crossfading_sessions: usize,
}

pub struct SessionRegistry {
    ctx: EngineContext,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Handle for `id`, starting a session if there is none
    pub async fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(id) {
            return handle.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionHandle::spawn(id, self.ctx.clone()))
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Reset one session if it exists; returns false if it does not
    pub async fn reset(&self, id: &str, destroy_connection: bool) -> Result<bool> {
        match self.get(id).await {
            Some(handle) => {
                handle.reset(destroy_connection).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stats(&self) -> RegistryStats {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();

        let mut stats = RegistryStats::default();
        for handle in handles {
            match handle.status().await {
                Ok(status) => {
                    stats.active_sessions += 1;
                    stats.total_queued += status.queue_length;
                    if status.is_playing {
                        stats.playing_sessions += 1;
                    }
                    if status.is_crossfading {
                        stats.crossfading_sessions += 1;
                    }
                }
                Err(e) => warn!("Skipping session in stats: {}", e),
            }
        }
        stats
    }

    /// Tear every session down and end their tasks
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, SessionHandle)> = self.sessions.write().await.drain().collect();
        let count = sessions.len();
        for (id, handle) in sessions {
            if let Err(e) = handle.shutdown().await {
                warn!("Session {} did not shut down cleanly: {}", id, e);
            }
        }
        info!("Shut down {} session(s)", count);
    }
}

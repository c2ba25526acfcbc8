//! Transient file cleanup
//!
//! Files backing transient tracks are removed a short grace delay after
//! their playback ends. Failures are logged and left for the periodic sweep,
//! which removes anything in the temp directory older than a fixed age.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Schedules transient file removal
#[derive(Debug, Clone)]
pub struct Janitor {
    grace: Duration,
}

impl Janitor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Remove `path` once the grace delay has elapsed
    ///
    /// Not cancelled by later session activity.
    pub fn schedule_removal(&self, path: PathBuf) -> JoinHandle<()> {
        let grace = self.grace;
        debug!("Scheduling removal of {} in {:?}", path.display(), grace);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = remove_file(&path).await {
                warn!("{}", e);
            }
        })
    }
}

/// Remove one file; a file that is already gone counts as removed
pub async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed transient file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::ResourceCleanup(format!(
            "failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Remove regular files in `dir` last modified more than `max_age` ago
///
/// Returns how many were removed. Individual failures are logged.
pub async fn sweep_dir(dir: &Path, max_age: Duration) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match remove_file(&entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("{}", e),
        }
    }

    if removed > 0 {
        info!("Sweep removed {} stale file(s) from {}", removed, dir.display());
    }
    Ok(removed)
}

/// Run [`sweep_dir`] every `interval` until the task is aborted
pub fn spawn_sweeper(dir: PathBuf, interval: Duration, max_age: Duration) -> JoinHandle<()> {
    info!(
        "Temp sweep every {:?} for files older than {:?} in {}",
        interval,
        max_age,
        dir.display()
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_dir(&dir, max_age).await {
                warn!("Temp sweep of {} failed: {}", dir.display(), e);
            }
        }
    })
}

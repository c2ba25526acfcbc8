//! Track queue
//!
//! Ordered FIFO of pending tracks for one session. The currently playing
//! track is not part of the queue; it lives on the session.

use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::path::PathBuf;
use uuid::Uuid;
use vcmp_common::events::TrackInfo;
use vcmp_common::filters::validate_speed;
use vcmp_common::FilterPreset;

use crate::error::Result;

/// A queued playable item
///
/// Immutable once enqueued; consumed exactly once by dequeue.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    /// Unique per enqueue, so re-queued copies of one file stay distinct
    pub entry_id: Uuid,
    /// Display name
    pub name: String,
    /// Backing audio file
    pub source: PathBuf,
    pub filter: Option<FilterPreset>,
    /// Tempo factor for speed-bearing presets
    pub speed: f64,
    pub requested_by: String,
    /// Backing file is removed after playback
    pub transient: bool,
}

impl TrackRequest {
    /// New request at normal speed with no filter
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, requested_by: impl Into<String>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            name: name.into(),
            source: source.into(),
            filter: None,
            speed: 1.0,
            requested_by: requested_by.into(),
            transient: false,
        }
    }

    pub fn with_filter(mut self, filter: Option<FilterPreset>) -> Self {
        self.filter = filter;
        self
    }

    /// Set the speed factor; rejected outside 0.1-5.0
    pub fn with_speed(mut self, speed: f64) -> Result<Self> {
        self.speed = validate_speed(speed)?;
        Ok(self)
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    /// Fresh copy with a new entry id, used when a looped track is re-queued
    pub fn requeued(&self) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Announcement view of this track
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            entry_id: self.entry_id,
            name: self.name.clone(),
            requested_by: self.requested_by.clone(),
            filter: self.filter,
            speed: self.speed,
            transient: self.transient,
        }
    }
}

/// FIFO of pending tracks
#[derive(Debug, Default)]
pub struct TrackQueue {
    entries: VecDeque<TrackRequest>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail (no deduplication)
    pub fn enqueue(&mut self, track: TrackRequest) {
        self.entries.push_back(track);
    }

    /// Remove and return the head
    pub fn dequeue_head(&mut self) -> Option<TrackRequest> {
        self.entries.pop_front()
    }

    /// Put a track back at the head (loop re-insertion)
    pub fn push_front(&mut self, track: TrackRequest) {
        self.entries.push_front(track);
    }

    /// Head of the queue without removing it
    pub fn peek(&self) -> Option<&TrackRequest> {
        self.entries.front()
    }

    /// Uniform Fisher-Yates permutation; no-op below two entries
    pub fn shuffle(&mut self) {
        if self.entries.len() < 2 {
            return;
        }
        self.entries
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
    }

    /// Drop every pending entry
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Remove the entry at `index` (0 = head)
    pub fn remove(&mut self, index: usize) -> Option<TrackRequest> {
        self.entries.remove(index)
    }

    /// Ordered copy of the pending entries
    pub fn snapshot(&self) -> Vec<TrackRequest> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str) -> TrackRequest {
        TrackRequest::new(name, format!("/music/{}.mp3", name), "tester")
    }

    fn names(queue: &TrackQueue) -> Vec<String> {
        queue.snapshot().into_iter().map(|t| t.name).collect()
    }

    #[test]
    fn test_fifo_order_and_length() {
        let mut queue = TrackQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.enqueue(track(name));
        }
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.dequeue_head().unwrap().name, "a");
        assert_eq!(queue.dequeue_head().unwrap().name, "b");
        assert_eq!(queue.len(), 2);
        assert_eq!(names(&queue), vec!["c", "d"]);
    }

    #[test]
    fn test_dequeue_empty() {
        let mut queue = TrackQueue::new();
        assert!(queue.dequeue_head().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_does_not_dedup() {
        let mut queue = TrackQueue::new();
        let a = track("a");
        queue.enqueue(a.clone());
        queue.enqueue(a);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_push_front_for_loop() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("b"));
        let a = track("a");
        queue.push_front(a.requeued());
        assert_eq!(names(&queue), vec!["a", "b"]);
        assert_ne!(queue.peek().unwrap().entry_id, a.entry_id);
    }

    #[test]
    fn test_shuffle_preserves_entries() {
        let mut queue = TrackQueue::new();
        for i in 0..20 {
            queue.enqueue(track(&i.to_string()));
        }
        let mut before = names(&queue);
        queue.shuffle();
        let mut after = names(&queue);
        assert_eq!(after.len(), 20);
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_shuffle_single_is_noop() {
        let mut queue = TrackQueue::new();
        queue.shuffle();
        queue.enqueue(track("only"));
        queue.shuffle();
        assert_eq!(names(&queue), vec!["only"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut queue = TrackQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(track(name));
        }
        assert_eq!(queue.remove(1).unwrap().name, "b");
        assert!(queue.remove(5).is_none());
        assert_eq!(names(&queue), vec!["a", "c"]);

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_speed_validation() {
        assert!(track("a").with_speed(2.0).is_ok());
        assert!(track("a").with_speed(0.05).is_err());
        assert!(track("a").with_speed(6.0).is_err());
    }
}

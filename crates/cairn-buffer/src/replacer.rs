//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Trait for page replacement algorithms.
///
/// A replacer tracks the set of evictable frames: frames that are mapped to
/// a page but currently unpinned. Pinned frames must never be evictable.
pub trait Replacer: Send + Sync {
    /// Pops and returns the least-recently-unpinned evictable frame.
    ///
    /// Returns None if no frames are evictable.
    fn victim(&self) -> Option<FrameId>;

    /// Removes the frame from the evictable set, if present.
    fn pin(&self, frame_id: FrameId);

    /// Inserts the frame at the most-recently-used end, if absent.
    fn unpin(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Exact LRU replacement.
///
/// Frames enter at the MRU end on unpin and are victimized from the LRU
/// end, so eviction order follows unpin order.
pub struct LruReplacer {
    /// Number of frames this replacer can track.
    num_frames: usize,
    /// Queue and membership set, protected together.
    inner: Mutex<LruInner>,
}

struct LruInner {
    /// Evictable frames ordered LRU (front) to MRU (back).
    queue: VecDeque<FrameId>,
    /// Membership set mirroring `queue`.
    members: HashSet<FrameId>,
}

impl LruReplacer {
    /// Creates a new LRU replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            inner: Mutex::new(LruInner {
                queue: VecDeque::with_capacity(num_frames),
                members: HashSet::with_capacity(num_frames),
            }),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let frame_id = inner.queue.pop_front()?;
        inner.members.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.members.remove(&frame_id) {
            inner.queue.retain(|f| *f != frame_id);
        }
    }

    fn unpin(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.members.insert(frame_id) {
            inner.queue.push_back(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_victim_empty() {
        let replacer = LruReplacer::new(10);
        assert!(replacer.victim().is_none());
    }

    #[test]
    fn test_lru_replacer_unpin_then_victim() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId(5));
        assert_eq!(replacer.size(), 1);

        let victim = replacer.victim();
        assert_eq!(victim, Some(FrameId(5)));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_eviction_order() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId(0));
        replacer.unpin(FrameId(1));
        replacer.unpin(FrameId(2));

        // Least recently unpinned first
        assert_eq!(replacer.victim(), Some(FrameId(0)));
        assert_eq!(replacer.victim(), Some(FrameId(1)));
        assert_eq!(replacer.victim(), Some(FrameId(2)));
        assert!(replacer.victim().is_none());
    }

    #[test]
    fn test_lru_replacer_unpin_is_idempotent() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId(3));
        replacer.unpin(FrameId(3));
        replacer.unpin(FrameId(3));

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId(3)));
        assert!(replacer.victim().is_none());
    }

    #[test]
    fn test_lru_replacer_pin_removes() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId(0));
        replacer.unpin(FrameId(1));
        assert_eq!(replacer.size(), 2);

        replacer.pin(FrameId(0));
        assert_eq!(replacer.size(), 1);

        assert_eq!(replacer.victim(), Some(FrameId(1)));
        assert!(replacer.victim().is_none());
    }

    #[test]
    fn test_lru_replacer_pin_absent_frame() {
        let replacer = LruReplacer::new(10);

        // Should not panic or affect state
        replacer.pin(FrameId(7));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_reinsert_moves_to_mru() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId(0));
        replacer.unpin(FrameId(1));

        // Frame 0 gets pinned and unpinned again: it is now most recent
        replacer.pin(FrameId(0));
        replacer.unpin(FrameId(0));

        assert_eq!(replacer.victim(), Some(FrameId(1)));
        assert_eq!(replacer.victim(), Some(FrameId(0)));
    }

    #[test]
    fn test_lru_replacer_out_of_bounds_unpin() {
        let replacer = LruReplacer::new(5);

        replacer.unpin(FrameId(100));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_pin_unpin_cycle() {
        let replacer = LruReplacer::new(3);

        replacer.unpin(FrameId(0));
        replacer.unpin(FrameId(1));
        replacer.unpin(FrameId(2));
        assert_eq!(replacer.size(), 3);

        replacer.pin(FrameId(1));
        assert_eq!(replacer.size(), 2);

        // Victim should skip frame 1
        let victim = replacer.victim();
        assert_eq!(victim, Some(FrameId(0)));

        replacer.unpin(FrameId(1));
        assert_eq!(replacer.size(), 2);
    }
}

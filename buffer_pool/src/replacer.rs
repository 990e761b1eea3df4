//! Recency order used to pick eviction victims.
use common::api::FrameId;
use hashlink::LinkedHashSet;

/// Keeps every bound frame in least- to most-recently-used order.
///
/// The replacer knows nothing about pin counts. The pool passes a predicate
/// when it asks for a victim, so pinned frames are skipped without being
/// moved.
#[derive(Debug, Default)]
pub struct LruReplacer {
    order: LinkedHashSet<FrameId>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: LinkedHashSet::with_capacity(capacity),
        }
    }

    /// Moves `frame_id` to the most-recently-used end, adding it if absent.
    pub fn touch(&mut self, frame_id: FrameId) {
        self.order.remove(&frame_id);
        self.order.insert(frame_id);
    }

    /// Drops `frame_id` from the order. Returns whether it was present.
    pub fn remove(&mut self, frame_id: FrameId) -> bool {
        self.order.remove(&frame_id)
    }

    /// The least recently used frame accepted by `evictable`.
    pub fn victim(&self, evictable: impl Fn(FrameId) -> bool) -> Option<FrameId> {
        self.order.iter().copied().find(|&frame_id| evictable(frame_id))
    }

    pub fn contains(&self, frame_id: FrameId) -> bool {
        self.order.contains(&frame_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Frames from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.order.iter().copied()
    }
}

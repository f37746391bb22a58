use parking_lot::Mutex;

use crate::common::FrameId;

/// Intrusive list links for one frame. Frames are identified by index, so
/// the links live in a vector indexed by frame id.
#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<u32>,
    next: Option<u32>,
    linked: bool,
}

/// Doubly-linked recency list over frame indices. The head is the most
/// recently unpinned frame and the tail the least.
#[derive(Debug)]
struct LruList {
    links: Vec<Link>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            links: vec![Link::default(); capacity],
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn contains(&self, frame: u32) -> bool {
        self.links[frame as usize].linked
    }

    fn push_front(&mut self, frame: u32) {
        let old_head = self.head;
        self.links[frame as usize] = Link {
            prev: None,
            next: old_head,
            linked: true,
        };
        match old_head {
            Some(head) => self.links[head as usize].prev = Some(frame),
            None => self.tail = Some(frame),
        }
        self.head = Some(frame);
        self.len += 1;
    }

    fn unlink(&mut self, frame: u32) {
        let Link { prev, next, .. } = self.links[frame as usize];
        match prev {
            Some(prev) => self.links[prev as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.links[next as usize].prev = prev,
            None => self.tail = prev,
        }
        self.links[frame as usize] = Link::default();
        self.len -= 1;
    }

    fn pop_back(&mut self) -> Option<u32> {
        let tail = self.tail?;
        self.unlink(tail);
        Some(tail)
    }
}

/// LRU replacement policy.
///
/// Tracks the frames whose pin count dropped to zero, ordered by when that
/// happened. `victim` evicts the frame that has been unpinned the longest.
/// Every operation is O(1).
pub struct LruReplacer {
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    list: Mutex<LruList>,
}

impl LruReplacer {
    /// Creates a new LRU replacer able to track `max_frames` frames.
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames,
            list: Mutex::new(LruList::new(max_frames)),
        }
    }

    /// Removes and returns the least recently unpinned frame.
    pub fn victim(&self) -> Option<FrameId> {
        self.list.lock().pop_back().map(FrameId::new)
    }

    /// Removes a frame from the candidate set. Called when the frame is pinned.
    pub fn pin(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }
        let mut list = self.list.lock();
        if list.contains(frame_id.as_u32()) {
            list.unlink(frame_id.as_u32());
        }
    }

    /// Adds a frame as the most recent candidate. A frame already tracked
    /// keeps its position.
    pub fn unpin(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }
        let mut list = self.list.lock();
        if !list.contains(frame_id.as_u32()) && list.len < self.max_frames {
            list.push_front(frame_id.as_u32());
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.list.lock().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_basic() {
        let replacer = LruReplacer::new(7);
        for i in [1, 2, 3, 4, 5, 6, 1] {
            replacer.unpin(FrameId::new(i));
        }
        assert_eq!(replacer.size(), 6);

        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));

        replacer.pin(FrameId::new(3));
        replacer.pin(FrameId::new(4));
        assert_eq!(replacer.size(), 2);

        replacer.unpin(FrameId::new(4));
        assert_eq!(replacer.victim(), Some(FrameId::new(5)));
        assert_eq!(replacer.victim(), Some(FrameId::new(6)));
        assert_eq!(replacer.victim(), Some(FrameId::new(4)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_pin_middle() {
        let replacer = LruReplacer::new(4);
        for i in 0..4 {
            replacer.unpin(FrameId::new(i));
        }
        replacer.pin(FrameId::new(2));
        replacer.pin(FrameId::new(0));
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_out_of_range() {
        let replacer = LruReplacer::new(2);
        replacer.unpin(FrameId::new(5));
        replacer.pin(FrameId::new(5));
        assert_eq!(replacer.size(), 0);
    }
}

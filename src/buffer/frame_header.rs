use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// One buffer frame: a page-sized buffer plus the bookkeeping the pool needs
/// to cache it. Only the buffer pool changes the page id, pin count and dirty
/// flag; everyone else reaches a frame through a `PageGuard`.
pub struct FrameHeader {
    frame_id: FrameId,
    /// The page ID stored in this frame (INVALID_PAGE_ID if empty)
    page_id: RwLock<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl FrameHeader {
    pub(super) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID stored in this frame.
    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub(super) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub(super) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(super) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub(super) fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    pub(super) fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Points the frame at a new page with a single pin and a zeroed buffer.
    pub(super) fn install(&self, page_id: PageId) {
        *self.page_id.write() = page_id;
        self.pin_count.store(1, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }

    /// Resets the frame to its initial state.
    pub(super) fn reset(&self) {
        *self.page_id.write() = INVALID_PAGE_ID;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_new() {
        let frame = FrameHeader::new(FrameId::new(0));
        assert_eq!(frame.frame_id(), FrameId::new(0));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_pin_unpin() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_header_install_and_reset() {
        let frame = FrameHeader::new(FrameId::new(3));
        frame.write_data()[0] = 7;
        frame.set_dirty(true);

        frame.install(PageId::new(5));
        assert_eq!(frame.page_id(), PageId::new(5));
        assert_eq!(frame.pin_count(), 1);
        assert!(!frame.is_dirty());
        assert_eq!(frame.read_data()[0], 0);

        frame.write_data()[10] = 1;
        frame.reset();
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert_eq!(frame.read_data()[10], 0);
    }
}

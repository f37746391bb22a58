use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::BufferPoolState;
use super::FrameHeader;

/// Shared view of a pinned page's bytes.
pub type PageData<'a> = RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>;

/// Exclusive view of a pinned page's bytes.
pub type PageDataMut<'a> = RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>;

/// RAII handle on a pinned page.
///
/// The page stays resident for as long as the guard lives. The pin is
/// released exactly once, either by `unpin` or when the guard is dropped,
/// together with whether the bytes were changed through `data_mut`. Data locks are only held while the returned
/// `PageData`/`PageDataMut` is alive, so several guards on the same page may
/// coexist as long as their data views do not overlap with a writer.
pub struct PageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    state: Arc<BufferPoolState>,
    is_dirty: bool,
    pinned: bool,
}

impl PageGuard {
    pub(super) fn new(page_id: PageId, frame: Arc<FrameHeader>, state: Arc<BufferPoolState>) -> Self {
        Self {
            page_id,
            frame,
            state,
            is_dirty: false,
            pinned: true,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Locks the page for reading.
    pub fn data(&self) -> PageData<'_> {
        debug_assert_eq!(self.frame.page_id(), self.page_id);
        self.frame.read_data()
    }

    /// Locks the page for writing and marks it dirty.
    pub fn data_mut(&mut self) -> PageDataMut<'_> {
        debug_assert_eq!(self.frame.page_id(), self.page_id);
        self.is_dirty = true;
        self.frame.write_data()
    }

    /// Returns whether this guard has written to the page.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Releases the pin now. `is_dirty` is sticky: it can mark the page dirty
    /// but never clean it. Returns false if the page had already left the
    /// pool.
    pub fn unpin(mut self, is_dirty: bool) -> bool {
        self.is_dirty |= is_dirty;
        self.release()
    }

    fn release(&mut self) -> bool {
        if !std::mem::replace(&mut self.pinned, false) {
            return false;
        }
        self.state.unpin(self.page_id, self.is_dirty)
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.release();
    }
}

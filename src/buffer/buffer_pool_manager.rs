use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::common::{BurrowError, FrameId, PageId, Result, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;

use super::{FrameHeader, LruReplacer, PageGuard};

/// Page table and free list, always updated together.
struct PoolTables {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page
    free_list: VecDeque<FrameId>,
}

/// State shared between the pool and the guards it hands out.
pub(super) struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    tables: Mutex<PoolTables>,
    replacer: LruReplacer,
}

impl BufferPoolState {
    /// Releases one pin on a resident page. A frame whose pin count reaches
    /// zero becomes a replacement candidate.
    pub(super) fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let tables = self.tables.lock();
        let Some(&frame_id) = tables.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        match frame.unpin() {
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.unpin(frame_id);
                }
                true
            }
            None => false,
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed set of frames.
///
/// Frames come from the free list first and otherwise from the LRU replacer;
/// a dirty victim is written back before its frame is reused. Pages are
/// handed out as pinned `PageGuard`s. Running out of frames is reported as
/// `None`/`false`, while disk failures are returned as errors.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with `pool_size` frames over the given disk manager.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            tables: Mutex::new(PoolTables {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
        });

        Self {
            pool_size,
            state,
            disk_manager,
        }
    }

    fn frame(&self, frame_id: FrameId) -> &Arc<FrameHeader> {
        &self.state.frames[frame_id.as_usize()]
    }

    fn make_guard(&self, page_id: PageId, frame_id: FrameId) -> PageGuard {
        PageGuard::new(
            page_id,
            Arc::clone(self.frame(frame_id)),
            Arc::clone(&self.state),
        )
    }

    /// Fetches a page, reading it from disk if it is not resident.
    /// Returns None if every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PageGuard>> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }

        let mut tables = self.state.tables.lock();
        if let Some(&frame_id) = tables.page_table.get(&page_id) {
            self.frame(frame_id).pin();
            self.state.replacer.pin(frame_id);
            drop(tables);
            return Ok(Some(self.make_guard(page_id, frame_id)));
        }

        let Some(frame_id) = self.acquire_frame(&mut tables)? else {
            debug!(%page_id, "no frame available to fetch page");
            return Ok(None);
        };

        let frame = self.frame(frame_id);
        frame.install(page_id);
        let read = {
            let mut data = frame.write_data();
            self.disk_manager.read_page(page_id, &mut data[..])
        };
        if let Err(e) = read {
            frame.reset();
            tables.free_list.push_back(frame_id);
            return Err(e);
        }

        tables.page_table.insert(page_id, frame_id);
        drop(tables);
        trace!(%page_id, frame = %frame_id, "loaded page");
        Ok(Some(self.make_guard(page_id, frame_id)))
    }

    /// Allocates a fresh page on disk and returns it pinned with zeroed bytes.
    /// Returns None if every frame is pinned or the disk is full.
    pub fn new_page(&self) -> Result<Option<PageGuard>> {
        let mut tables = self.state.tables.lock();
        if tables.free_list.is_empty() && self.state.replacer.size() == 0 {
            debug!("every frame is pinned, cannot create a page");
            return Ok(None);
        }

        let Some(page_id) = self.disk_manager.allocate_page()? else {
            return Ok(None);
        };

        let frame_id = match self.acquire_frame(&mut tables) {
            Ok(Some(frame_id)) => frame_id,
            Ok(None) => {
                self.disk_manager.deallocate_page(page_id)?;
                return Ok(None);
            }
            Err(e) => {
                self.disk_manager.deallocate_page(page_id)?;
                return Err(e);
            }
        };

        // The slot may hold bytes from a previously freed page, so the zeroed
        // image must reach disk even if nobody writes to it.
        let frame = self.frame(frame_id);
        frame.install(page_id);
        frame.set_dirty(true);

        tables.page_table.insert(page_id, frame_id);
        drop(tables);
        debug!(%page_id, frame = %frame_id, "created page");
        Ok(Some(self.make_guard(page_id, frame_id)))
    }

    /// Deletes a resident page from the pool and frees it on disk.
    /// Returns false if the page is pinned. A page that is not resident is
    /// left alone and reports true.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }

        let mut tables = self.state.tables.lock();
        let Some(&frame_id) = tables.page_table.get(&page_id) else {
            return Ok(true);
        };

        let frame = self.frame(frame_id);
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        self.disk_manager.deallocate_page(page_id)?;
        tables.page_table.remove(&page_id);
        self.state.replacer.pin(frame_id);
        frame.reset();
        tables.free_list.push_back(frame_id);
        debug!(%page_id, "deleted page");
        Ok(true)
    }

    /// Writes a resident page to disk if it is dirty.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }

        let tables = self.state.tables.lock();
        let Some(&frame_id) = tables.page_table.get(&page_id) else {
            return Ok(false);
        };
        self.write_back(page_id, self.frame(frame_id))?;
        Ok(true)
    }

    /// Flushes all dirty pages in the buffer pool to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let tables = self.state.tables.lock();
        for (&page_id, &frame_id) in tables.page_table.iter() {
            self.write_back(page_id, self.frame(frame_id))?;
        }
        Ok(())
    }

    fn write_back(&self, page_id: PageId, frame: &FrameHeader) -> Result<()> {
        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk_manager.write_page(page_id, &data[..])?;
            frame.set_dirty(false);
            trace!(%page_id, "flushed page");
        }
        Ok(())
    }

    /// Allocates a page on disk without bringing it into the pool.
    pub fn allocate_page(&self) -> Result<Option<PageId>> {
        self.disk_manager.allocate_page()
    }

    /// Frees a page on disk without touching the pool.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.disk_manager.deallocate_page(page_id)
    }

    /// Returns true if the page is not allocated on disk.
    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        self.disk_manager.is_page_free(page_id)
    }

    /// Returns true if no resident page is pinned, logging every page that is.
    pub fn check_all_unpinned(&self) -> bool {
        let tables = self.state.tables.lock();
        let mut all_unpinned = true;
        for (&page_id, &frame_id) in tables.page_table.iter() {
            let pin_count = self.frame(frame_id).pin_count();
            if pin_count > 0 {
                warn!(%page_id, pin_count, "page is still pinned");
                all_unpinned = false;
            }
        }
        all_unpinned
    }

    /// Returns the pin count for a page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let tables = self.state.tables.lock();
        tables
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frame(frame_id).pin_count())
    }

    /// Returns whether a resident page is dirty.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let tables = self.state.tables.lock();
        tables
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frame(frame_id).is_dirty())
    }

    /// Returns true if the page is resident in the pool.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.tables.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.tables.lock().free_list.len()
    }

    /// Returns the underlying disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Takes a frame from the free list, or evicts the least recently
    /// unpinned page, writing it back first if it is dirty.
    fn acquire_frame(&self, tables: &mut PoolTables) -> Result<Option<FrameId>> {
        if let Some(frame_id) = tables.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.state.replacer.victim() else {
            return Ok(None);
        };
        let frame = self.frame(frame_id);
        let old_page_id = frame.page_id();

        if let Err(e) = self.write_back(old_page_id, frame) {
            // Keep the page resident and evictable.
            self.state.replacer.unpin(frame_id);
            return Err(e);
        }

        tables.page_table.remove(&old_page_id);
        frame.reset();
        debug!(page_id = %old_page_id, frame = %frame_id, "evicted page");
        Ok(Some(frame_id))
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            error!("failed to flush buffer pool on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PAGE_SIZE;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (BufferPoolManager::new(pool_size, dm), temp_file)
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(3);
        let guard = bpm.new_page().unwrap().unwrap();
        assert_eq!(guard.page_id(), PageId::new(0));
        assert_eq!(bpm.get_pin_count(guard.page_id()), Some(1));
        assert_eq!(bpm.free_frame_count(), 2);
        assert!(guard.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpin_marks_dirty() {
        let (bpm, _temp) = create_bpm(3);
        let page_id = bpm.new_page().unwrap().unwrap().page_id();
        bpm.flush_page(page_id).unwrap();
        assert_eq!(bpm.is_dirty(page_id), Some(false));

        let guard = bpm.fetch_page(page_id).unwrap().unwrap();
        assert!(guard.unpin(true));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert_eq!(bpm.is_dirty(page_id), Some(true));
    }

    #[test]
    fn test_residency_follows_eviction() {
        let (bpm, _temp) = create_bpm(1);
        let first = bpm.new_page().unwrap().unwrap().page_id();
        assert!(bpm.is_resident(first));
        let second = bpm.new_page().unwrap().unwrap().page_id();
        assert!(!bpm.is_resident(first));
        assert!(bpm.is_resident(second));
    }

    #[test]
    fn test_dirty_victim_is_written_back() {
        let (bpm, _temp) = create_bpm(1);

        let page_id = {
            let mut guard = bpm.new_page().unwrap().unwrap();
            guard.data_mut()[..4].copy_from_slice(b"burr");
            guard.page_id()
        };

        // Evicts the only frame.
        let other = bpm.new_page().unwrap().unwrap().page_id();
        assert_ne!(other, page_id);
        assert_eq!(bpm.get_pin_count(page_id), None);

        let mut data = [0u8; PAGE_SIZE];
        bpm.disk_manager().read_page(page_id, &mut data).unwrap();
        assert_eq!(&data[..4], b"burr");

        let guard = bpm.fetch_page(page_id).unwrap().unwrap();
        assert_eq!(&guard.data()[..4], b"burr");
    }

    #[test]
    fn test_delete_pinned_page() {
        let (bpm, _temp) = create_bpm(2);
        let guard = bpm.new_page().unwrap().unwrap();
        let page_id = guard.page_id();

        assert!(!bpm.delete_page(page_id).unwrap());
        drop(guard);
        assert!(bpm.delete_page(page_id).unwrap());
        assert!(bpm.is_page_free(page_id).unwrap());
        assert_eq!(bpm.free_frame_count(), 2);
        assert!(bpm.check_all_unpinned());
    }

    #[test]
    fn test_flush_clears_dirty() {
        let (bpm, _temp) = create_bpm(2);
        let page_id = bpm.new_page().unwrap().unwrap().page_id();
        assert_eq!(bpm.is_dirty(page_id), Some(true));

        let writes = bpm.disk_manager().get_num_writes();
        assert!(bpm.flush_page(page_id).unwrap());
        assert!(bpm.flush_page(page_id).unwrap());
        assert_eq!(bpm.disk_manager().get_num_writes(), writes + 1);
        assert_eq!(bpm.is_dirty(page_id), Some(false));
        assert!(!bpm.flush_page(PageId::new(99)).unwrap());
    }
}

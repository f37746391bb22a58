//! Registry mapping each index id to its current root page, so trees can be
//! reopened after a restart.
//!
//! Layout:
//! ```text
//! | magic (4) | count (4) | (index_id (4), root_page_id (4)) * count |
//! ```

use bytes::{Buf, BufMut};

use crate::common::{IndexId, PageId, PAGE_SIZE};

/// "IDXR"
pub const INDEX_ROOTS_MAGIC: u32 = 0x4944_5852;

const MAGIC_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const HEADER_SIZE: usize = 8;
const ENTRY_SIZE: usize = 8;

/// Maximum number of indexes the registry can hold.
pub const MAX_INDEX_ROOTS: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// View over a registry page image.
pub struct IndexRootsPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> IndexRootsPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    /// Checks that the page carries the registry magic.
    pub fn is_valid(&self) -> bool {
        (&self.data.as_ref()[MAGIC_OFFSET..]).get_u32_le() == INDEX_ROOTS_MAGIC
            && self.count() <= MAX_INDEX_ROOTS
    }

    pub fn count(&self) -> usize {
        (&self.data.as_ref()[COUNT_OFFSET..]).get_u32_le() as usize
    }

    fn entry(&self, slot: usize) -> (IndexId, PageId) {
        let mut buf = &self.data.as_ref()[HEADER_SIZE + slot * ENTRY_SIZE..];
        let index_id = buf.get_u32_le();
        let root = PageId::new(buf.get_u32_le());
        (index_id, root)
    }

    fn find(&self, index_id: IndexId) -> Option<usize> {
        (0..self.count()).find(|&slot| self.entry(slot).0 == index_id)
    }

    /// Returns the registered root of an index.
    pub fn get_root_id(&self, index_id: IndexId) -> Option<PageId> {
        self.find(index_id).map(|slot| self.entry(slot).1)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexRootsPage<B> {
    /// Initializes an empty registry.
    pub fn init(&mut self) {
        let data = self.data.as_mut();
        data.fill(0);
        (&mut data[MAGIC_OFFSET..]).put_u32_le(INDEX_ROOTS_MAGIC);
    }

    fn set_count(&mut self, count: usize) {
        (&mut self.data.as_mut()[COUNT_OFFSET..]).put_u32_le(count as u32);
    }

    fn set_entry(&mut self, slot: usize, index_id: IndexId, root: PageId) {
        let mut buf = &mut self.data.as_mut()[HEADER_SIZE + slot * ENTRY_SIZE..];
        buf.put_u32_le(index_id);
        buf.put_u32_le(root.as_u32());
    }

    /// Registers a new index. Returns false if it already exists or the page is full.
    pub fn insert(&mut self, index_id: IndexId, root: PageId) -> bool {
        let count = self.count();
        if self.find(index_id).is_some() || count >= MAX_INDEX_ROOTS {
            return false;
        }
        self.set_entry(count, index_id, root);
        self.set_count(count + 1);
        true
    }

    /// Updates the root of a registered index.
    pub fn update(&mut self, index_id: IndexId, root: PageId) -> bool {
        match self.find(index_id) {
            Some(slot) => {
                self.set_entry(slot, index_id, root);
                true
            }
            None => false,
        }
    }

    /// Removes an index from the registry, moving the last entry into its slot.
    pub fn delete(&mut self, index_id: IndexId) -> bool {
        let Some(slot) = self.find(index_id) else {
            return false;
        };
        let last = self.count() - 1;
        if slot != last {
            let (moved_id, moved_root) = self.entry(last);
            self.set_entry(slot, moved_id, moved_root);
        }
        self.set_entry(last, 0, PageId::new(0));
        self.set_count(last);
        true
    }
}

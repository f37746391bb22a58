//! Leaf page: sorted (key, RowId) pairs plus a link to the next leaf.
//!
//! Layout:
//! ```text
//! | tree page header (24) | next_page_id (4) | (key[key_size], page_id (4), slot_num (4)) * size |
//! ```

use std::cmp::Ordering;

use crate::common::{
    BurrowError, PageId, Result, RowId, INVALID_PAGE_ID, LEAF_PAGE_HEADER_SIZE, PAGE_SIZE,
    TREE_PAGE_HEADER_SIZE,
};

use super::btree_page::{page_type_of, read_u32, write_u32, IndexPageType, TreeNode, TreeNodeMut};
use super::key_comparator::KeyComparator;

const NEXT_PAGE_ID_OFFSET: usize = TREE_PAGE_HEADER_SIZE;

/// View over a leaf page image.
pub struct LeafPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> LeafPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    /// Wraps a page image, checking that it is tagged as a leaf.
    pub fn from_data(data: B) -> Result<Self> {
        match page_type_of(data.as_ref())? {
            IndexPageType::Leaf => Ok(Self::new(data)),
            IndexPageType::Internal => Err(BurrowError::CorruptFormat(
                "expected a leaf page, found an internal page".into(),
            )),
        }
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_u32(self.raw(), NEXT_PAGE_ID_OFFSET))
    }

    fn pair_size(&self) -> usize {
        self.key_size() + RowId::SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        LEAF_PAGE_HEADER_SIZE + index * self.pair_size()
    }

    /// Number of pairs that physically fit in the page.
    pub fn capacity(&self) -> usize {
        (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        assert!(index < self.capacity(), "leaf slot {index} out of bounds");
        let offset = self.pair_offset(index);
        &self.raw()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RowId {
        assert!(index < self.capacity(), "leaf slot {index} out of bounds");
        let offset = self.pair_offset(index) + self.key_size();
        RowId::new(
            PageId::new(read_u32(self.raw(), offset)),
            read_u32(self.raw(), offset + 4),
        )
    }

    /// First slot whose key is >= `key`, or `size` if there is none.
    pub fn key_index<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> usize {
        let (mut low, mut high) = (0, self.size());
        while low < high {
            let mid = low + (high - low) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> Option<RowId> {
        let index = self.key_index(key, comparator);
        if index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            Some(self.value_at(index))
        } else {
            None
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafPage<B> {
    /// Formats an empty leaf.
    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, key_size: usize, max_size: usize) {
        self.set_page_type(IndexPageType::Leaf);
        self.set_key_size(key_size);
        self.set_size(0);
        self.set_max_size(max_size);
        self.set_parent_page_id(parent_page_id);
        self.set_page_id(page_id);
        self.set_next_page_id(INVALID_PAGE_ID);
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        write_u32(self.raw_mut(), NEXT_PAGE_ID_OFFSET, next_page_id.as_u32());
    }

    fn write_pair(&mut self, index: usize, key: &[u8], value: RowId) {
        assert_eq!(key.len(), self.key_size(), "key width mismatch");
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        let data = self.raw_mut();
        data[offset..offset + key_size].copy_from_slice(key);
        write_u32(data, offset + key_size, value.page_id.as_u32());
        write_u32(data, offset + key_size + 4, value.slot_num);
    }

    fn insert_at(&mut self, index: usize, key: &[u8], value: RowId) {
        let size = self.size();
        assert!(size < self.capacity(), "leaf page overflow");
        let (start, end) = (self.pair_offset(index), self.pair_offset(size));
        let pair_size = self.pair_size();
        self.raw_mut().copy_within(start..end, start + pair_size);
        self.write_pair(index, key, value);
        self.set_size(size + 1);
    }

    fn remove_at(&mut self, index: usize) {
        let size = self.size();
        let (start, end) = (self.pair_offset(index + 1), self.pair_offset(size));
        let dest = self.pair_offset(index);
        self.raw_mut().copy_within(start..end, dest);
        self.set_size(size - 1);
    }

    /// Appends `count` raw pairs after the current entries.
    fn append_pairs(&mut self, pairs: &[u8], count: usize) {
        let size = self.size();
        assert!(size + count <= self.capacity(), "leaf page overflow");
        let offset = self.pair_offset(size);
        self.raw_mut()[offset..offset + pairs.len()].copy_from_slice(pairs);
        self.set_size(size + count);
    }

    /// Inserts in key order and returns the new size. An existing key leaves
    /// the page unchanged, which callers see as an unchanged size.
    pub fn insert<C: KeyComparator + ?Sized>(&mut self, key: &[u8], value: RowId, comparator: &C) -> usize {
        let size = self.size();
        let index = self.key_index(key, comparator);
        if index < size && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            return size;
        }
        self.insert_at(index, key, value);
        size + 1
    }

    /// Deletes `key` if present and returns the resulting size.
    pub fn remove_and_delete_record<C: KeyComparator + ?Sized>(&mut self, key: &[u8], comparator: &C) -> usize {
        let size = self.size();
        let index = self.key_index(key, comparator);
        if index < size && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            self.remove_at(index);
            return size - 1;
        }
        size
    }

    /// Moves the upper `size / 2` entries into an empty `recipient`.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<R>) {
        let size = self.size();
        let keep = size - size / 2;
        let (start, end) = (self.pair_offset(keep), self.pair_offset(size));
        recipient.append_pairs(&self.raw()[start..end], size - keep);
        self.set_size(keep);
    }

    /// Appends every entry to `recipient`, the left neighbour, and hands it
    /// this page's place in the leaf chain.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<R>) {
        let size = self.size();
        let end = self.pair_offset(size);
        recipient.append_pairs(&self.raw()[LEAF_PAGE_HEADER_SIZE..end], size);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Moves the first entry to the end of `recipient`, the left neighbour.
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<R>) {
        let end = recipient.size();
        recipient.insert_at(end, self.key_at(0), self.value_at(0));
        self.remove_at(0);
    }

    /// Moves the last entry to the front of `recipient`, the right neighbour.
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<R>) {
        let last = self.size() - 1;
        recipient.insert_at(0, self.key_at(last), self.value_at(last));
        self.remove_at(last);
    }
}

impl<B: AsRef<[u8]>> TreeNode for LeafPage<B> {
    fn raw(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreeNodeMut for LeafPage<B> {
    fn raw_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

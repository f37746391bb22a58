//! Internal page: `size` (key, child page id) pairs. The key in slot 0 is
//! unused; child `i` holds keys in `[key_i, key_{i+1})`.
//!
//! Layout:
//! ```text
//! | tree page header (24) | (key[key_size], child_page_id (4)) * size |
//! ```
//! Moves between pages return the children whose parent pointer the caller
//! must rewrite.

use std::cmp::Ordering;

use crate::common::{
    BurrowError, PageId, Result, INTERNAL_PAGE_HEADER_SIZE, INTERNAL_VALUE_SIZE, PAGE_SIZE,
};

use super::btree_page::{page_type_of, read_u32, write_u32, IndexPageType, TreeNode, TreeNodeMut};
use super::key_comparator::KeyComparator;

/// View over an internal page image.
pub struct InternalPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> InternalPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    /// Wraps a page image, checking that it is tagged as internal.
    pub fn from_data(data: B) -> Result<Self> {
        match page_type_of(data.as_ref())? {
            IndexPageType::Internal => Ok(Self::new(data)),
            IndexPageType::Leaf => Err(BurrowError::CorruptFormat(
                "expected an internal page, found a leaf page".into(),
            )),
        }
    }

    fn pair_size(&self) -> usize {
        self.key_size() + INTERNAL_VALUE_SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        INTERNAL_PAGE_HEADER_SIZE + index * self.pair_size()
    }

    pub fn capacity(&self) -> usize {
        (PAGE_SIZE - INTERNAL_PAGE_HEADER_SIZE) / self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        assert!(index < self.capacity(), "internal slot {index} out of bounds");
        let offset = self.pair_offset(index);
        &self.raw()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        assert!(index < self.capacity(), "internal slot {index} out of bounds");
        PageId::new(read_u32(self.raw(), self.pair_offset(index) + self.key_size()))
    }

    /// Slot holding the given child.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Child whose range contains `key`: the one under the greatest
    /// separator <= `key`.
    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> PageId {
        let (mut low, mut high) = (1, self.size());
        while low < high {
            let mid = low + (high - low) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Greater {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        self.value_at(low - 1)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalPage<B> {
    /// Formats an empty internal page.
    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, key_size: usize, max_size: usize) {
        self.set_page_type(IndexPageType::Internal);
        self.set_key_size(key_size);
        self.set_size(0);
        self.set_max_size(max_size);
        self.set_parent_page_id(parent_page_id);
        self.set_page_id(page_id);
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        assert!(index < self.capacity(), "internal slot {index} out of bounds");
        assert_eq!(key.len(), self.key_size(), "key width mismatch");
        let offset = self.pair_offset(index);
        self.raw_mut()[offset..offset + key.len()].copy_from_slice(key);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        assert!(index < self.capacity(), "internal slot {index} out of bounds");
        let offset = self.pair_offset(index) + self.key_size();
        write_u32(self.raw_mut(), offset, child.as_u32());
    }

    fn insert_at(&mut self, index: usize, key: &[u8], child: PageId) {
        let size = self.size();
        assert!(size < self.capacity(), "internal page overflow");
        let (start, end) = (self.pair_offset(index), self.pair_offset(size));
        let pair_size = self.pair_size();
        self.raw_mut().copy_within(start..end, start + pair_size);
        self.set_key_at(index, key);
        self.set_value_at(index, child);
        self.set_size(size + 1);
    }

    fn append_pairs(&mut self, pairs: &[u8], count: usize) {
        let size = self.size();
        assert!(size + count <= self.capacity(), "internal page overflow");
        let offset = self.pair_offset(size);
        self.raw_mut()[offset..offset + pairs.len()].copy_from_slice(pairs);
        self.set_size(size + count);
    }

    /// Fills a fresh root with two children split by `key`.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &[u8], new_child: PageId) {
        self.set_key_at(1, key);
        self.set_value_at(0, old_child);
        self.set_value_at(1, new_child);
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` right after `old_child` and returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &[u8], new_child: PageId) -> Result<usize> {
        let index = self.value_index(old_child).ok_or_else(|| {
            BurrowError::IndexCorrupted(format!(
                "{old_child} is not a child of {}",
                self.page_id()
            ))
        })?;
        self.insert_at(index + 1, key, new_child);
        Ok(self.size())
    }

    /// Removes the pair at `index`.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        assert!(index < size, "internal slot {index} out of bounds");
        let (start, end) = (self.pair_offset(index + 1), self.pair_offset(size));
        let dest = self.pair_offset(index);
        self.raw_mut().copy_within(start..end, dest);
        self.set_size(size - 1);
    }

    /// Empties a single-child page and returns that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        assert_eq!(self.size(), 1, "page has more than one child");
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    fn children(&self, range: std::ops::Range<usize>) -> Vec<PageId> {
        range.map(|i| self.value_at(i)).collect()
    }

    /// Moves the upper `size / 2` pairs into an empty `recipient`. The key
    /// left in the recipient's slot 0 is the separator for the parent.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut InternalPage<R>) -> Vec<PageId> {
        let size = self.size();
        let keep = size - size / 2;
        let moved = self.children(keep..size);
        let (start, end) = (self.pair_offset(keep), self.pair_offset(size));
        recipient.append_pairs(&self.raw()[start..end], size - keep);
        self.set_size(keep);
        moved
    }

    /// Appends every pair to `recipient`, the left neighbour. `middle_key` is
    /// the parent's separator and replaces this page's slot 0 placeholder.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
        middle_key: &[u8],
    ) -> Vec<PageId> {
        let size = self.size();
        self.set_key_at(0, middle_key);
        let moved = self.children(0..size);
        let end = self.pair_offset(size);
        recipient.append_pairs(&self.raw()[INTERNAL_PAGE_HEADER_SIZE..end], size);
        self.set_size(0);
        moved
    }

    /// Moves the first child to the end of `recipient`, the left neighbour,
    /// under `middle_key`. This page's new slot 0 key becomes the separator.
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
        middle_key: &[u8],
    ) -> PageId {
        let child = self.value_at(0);
        let end = recipient.size();
        recipient.insert_at(end, middle_key, child);
        self.remove(0);
        child
    }

    /// Moves the last child to the front of `recipient`, the right
    /// neighbour. `middle_key` becomes the recipient's first real separator
    /// and the moved key its new slot 0 key, which the parent takes.
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
        middle_key: &[u8],
    ) -> PageId {
        let last = self.size() - 1;
        let child = self.value_at(last);
        recipient.set_key_at(0, middle_key);
        recipient.insert_at(0, self.key_at(last), child);
        self.set_size(last);
        child
    }
}

impl<B: AsRef<[u8]>> TreeNode for InternalPage<B> {
    fn raw(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreeNodeMut for InternalPage<B> {
    fn raw_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::INVALID_PAGE_ID;
    use crate::index::IntegerComparator;

    fn key(k: u32) -> [u8; 4] {
        k.to_le_bytes()
    }

    /// Children 100, 110, 120, ... separated by keys 10, 20, 30, ...
    fn internal_with(data: &mut [u8], children: u32, max_size: usize) {
        let mut page = InternalPage::new(data);
        page.init(PageId::new(1), INVALID_PAGE_ID, 4, max_size);
        page.populate_new_root(PageId::new(100), &key(10), PageId::new(110));
        for i in 2..children {
            page.insert_node_after(PageId::new(100 + (i - 1) * 10), &key(i * 10), PageId::new(100 + i * 10))
                .unwrap();
        }
    }

    #[test]
    fn test_lookup() {
        let mut data = vec![0u8; PAGE_SIZE];
        internal_with(&mut data, 4, 8);
        let page = InternalPage::new(&data[..]);

        assert_eq!(page.size(), 4);
        assert_eq!(page.lookup(&key(5), &IntegerComparator), PageId::new(100));
        assert_eq!(page.lookup(&key(10), &IntegerComparator), PageId::new(110));
        assert_eq!(page.lookup(&key(25), &IntegerComparator), PageId::new(120));
        assert_eq!(page.lookup(&key(99), &IntegerComparator), PageId::new(130));
        assert_eq!(page.value_index(PageId::new(120)), Some(2));
        assert_eq!(page.value_index(PageId::new(999)), None);
    }

    #[test]
    fn test_insert_node_after_unknown_child() {
        let mut data = vec![0u8; PAGE_SIZE];
        internal_with(&mut data, 2, 8);
        let mut page = InternalPage::new(&mut data[..]);
        assert!(matches!(
            page.insert_node_after(PageId::new(7), &key(1), PageId::new(8)),
            Err(BurrowError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_move_half_returns_moved_children() {
        let mut left = vec![0u8; PAGE_SIZE];
        let mut right = vec![0u8; PAGE_SIZE];
        internal_with(&mut left, 5, 4);

        let mut old = InternalPage::new(&mut left[..]);
        let mut new = InternalPage::new(&mut right[..]);
        new.init(PageId::new(2), INVALID_PAGE_ID, 4, 4);
        let moved = old.move_half_to(&mut new);

        assert_eq!(old.size(), 3);
        assert_eq!(new.size(), 2);
        assert_eq!(moved, vec![PageId::new(130), PageId::new(140)]);
        // Separator pushed to the parent.
        assert_eq!(new.key_at(0), key(30));
    }

    #[test]
    fn test_redistribution_moves() {
        let mut left = vec![0u8; PAGE_SIZE];
        let mut right = vec![0u8; PAGE_SIZE];
        internal_with(&mut left, 3, 4);
        {
            let mut page = InternalPage::new(&mut right[..]);
            page.init(PageId::new(2), INVALID_PAGE_ID, 4, 4);
            page.populate_new_root(PageId::new(200), &key(60), PageId::new(210));
        }

        let mut l = InternalPage::new(&mut left[..]);
        let mut r = InternalPage::new(&mut right[..]);

        // Parent separator between the two pages is 50.
        let moved = l.move_last_to_front_of(&mut r, &key(50));
        assert_eq!(moved, PageId::new(120));
        assert_eq!(l.size(), 2);
        assert_eq!(r.size(), 3);
        assert_eq!(r.key_at(0), key(20));
        assert_eq!(r.key_at(1), key(50));
        assert_eq!(r.value_at(1), PageId::new(200));

        let moved = r.move_first_to_end_of(&mut l, &key(20));
        assert_eq!(moved, PageId::new(120));
        assert_eq!(l.key_at(2), key(20));
        assert_eq!(r.key_at(0), key(50));
        assert_eq!(r.size(), 2);
    }

    #[test]
    fn test_move_all_and_only_child() {
        let mut left = vec![0u8; PAGE_SIZE];
        let mut right = vec![0u8; PAGE_SIZE];
        internal_with(&mut left, 2, 4);
        {
            let mut page = InternalPage::new(&mut right[..]);
            page.init(PageId::new(2), INVALID_PAGE_ID, 4, 4);
            page.populate_new_root(PageId::new(200), &key(60), PageId::new(210));
        }

        let mut l = InternalPage::new(&mut left[..]);
        let mut r = InternalPage::new(&mut right[..]);
        let moved = r.move_all_to(&mut l, &key(50));
        assert_eq!(moved, vec![PageId::new(200), PageId::new(210)]);
        assert_eq!(l.size(), 4);
        assert_eq!(l.key_at(2), key(50));
        assert_eq!(l.key_at(3), key(60));

        l.remove(3);
        l.remove(2);
        l.remove(1);
        assert_eq!(l.remove_and_return_only_child(), PageId::new(100));
        assert_eq!(l.size(), 0);
    }
}

use std::fmt;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{BurrowError, PageId, Result, RowId, INVALID_PAGE_ID};

use super::btree_leaf_page::LeafPage;
use super::btree_page::TreeNode;

/// Forward cursor over the leaf chain.
///
/// The cursor holds no pin between steps; each step fetches the current leaf.
/// A position past the last entry of a leaf moves on to the next leaf, so
/// two cursors at the same entry compare equal, and a cursor run to the end
/// equals `BPlusTree::end()`.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Result<Self> {
        let mut iter = Self {
            bpm,
            page_id,
            index,
        };
        iter.normalize()?;
        Ok(iter)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn normalize(&mut self) -> Result<()> {
        while self.page_id != INVALID_PAGE_ID {
            let guard = self
                .bpm
                .fetch_page(self.page_id)?
                .ok_or(BurrowError::OutOfMemory)?;
            let data = guard.data();
            let leaf = LeafPage::from_data(&data[..])?;
            if self.index < leaf.size() || leaf.next_page_id() == INVALID_PAGE_ID {
                break;
            }
            self.page_id = leaf.next_page_id();
            self.index = 0;
        }
        Ok(())
    }

    /// Returns the current entry and steps past it, or None at the end.
    pub fn advance(&mut self) -> Result<Option<(Vec<u8>, RowId)>> {
        if self.page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let guard = self
            .bpm
            .fetch_page(self.page_id)?
            .ok_or(BurrowError::OutOfMemory)?;
        let data = guard.data();
        let leaf = LeafPage::from_data(&data[..])?;
        if self.index >= leaf.size() {
            return Ok(None);
        }

        let entry = (leaf.key_at(self.index).to_vec(), leaf.value_at(self.index));
        self.index += 1;
        if self.index >= leaf.size() && leaf.next_page_id() != INVALID_PAGE_ID {
            self.page_id = leaf.next_page_id();
            self.index = 0;
        }
        Ok(Some(entry))
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl Eq for IndexIterator {}

impl fmt::Debug for IndexIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexIterator")
            .field("page_id", &self.page_id)
            .field("index", &self.index)
            .finish()
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(Vec<u8>, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

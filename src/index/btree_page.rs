//! Header shared by every B+ tree page, and the tagged page variant.
//!
//! Layout (24 bytes, little-endian):
//! ```text
//! | page_type (1) | reserved (3) | key_size (4) | size (4) | max_size (4) | parent_page_id (4) | page_id (4) |
//! ```
//! Page views are generic over their buffer: `&[u8]` gives a read-only view
//! and `&mut [u8]` a writable one.

use bytes::{Buf, BufMut};

use crate::common::{BurrowError, PageId, Result, INVALID_PAGE_ID};

use super::btree_internal_page::InternalPage;
use super::btree_leaf_page::LeafPage;

const PAGE_TYPE_OFFSET: usize = 0;
const KEY_SIZE_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_PAGE_ID_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;

/// Discriminant stored in the first byte of a tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexPageType {
    Internal = 1,
    Leaf = 2,
}

impl TryFrom<u8> for IndexPageType {
    type Error = BurrowError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::Internal),
            2 => Ok(Self::Leaf),
            _ => Err(BurrowError::CorruptFormat(format!(
                "unknown tree page type {tag}"
            ))),
        }
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    (&data[offset..]).get_u32_le()
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    (&mut data[offset..]).put_u32_le(value);
}

pub(crate) fn page_type_of(data: &[u8]) -> Result<IndexPageType> {
    IndexPageType::try_from(data[PAGE_TYPE_OFFSET])
}

/// Header accessors shared by internal and leaf pages.
pub trait TreeNode {
    /// The whole page image.
    fn raw(&self) -> &[u8];

    fn is_leaf(&self) -> bool {
        self.raw()[PAGE_TYPE_OFFSET] == IndexPageType::Leaf as u8
    }

    fn key_size(&self) -> usize {
        read_u32(self.raw(), KEY_SIZE_OFFSET) as usize
    }

    /// Number of entries stored.
    fn size(&self) -> usize {
        read_u32(self.raw(), SIZE_OFFSET) as usize
    }

    fn max_size(&self) -> usize {
        read_u32(self.raw(), MAX_SIZE_OFFSET) as usize
    }

    /// Occupancy floor for every page except the root.
    fn min_size(&self) -> usize {
        self.max_size() / 2
    }

    fn parent_page_id(&self) -> PageId {
        PageId::new(read_u32(self.raw(), PARENT_PAGE_ID_OFFSET))
    }

    fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.raw(), PAGE_ID_OFFSET))
    }

    fn is_root(&self) -> bool {
        self.parent_page_id() == INVALID_PAGE_ID
    }
}

/// Header mutators shared by internal and leaf pages.
pub trait TreeNodeMut: TreeNode {
    fn raw_mut(&mut self) -> &mut [u8];

    fn set_page_type(&mut self, page_type: IndexPageType) {
        let data = self.raw_mut();
        data[PAGE_TYPE_OFFSET] = page_type as u8;
        data[PAGE_TYPE_OFFSET + 1..KEY_SIZE_OFFSET].fill(0);
    }

    fn set_key_size(&mut self, key_size: usize) {
        write_u32(self.raw_mut(), KEY_SIZE_OFFSET, key_size as u32);
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.raw_mut(), SIZE_OFFSET, size as u32);
    }

    fn set_max_size(&mut self, max_size: usize) {
        write_u32(self.raw_mut(), MAX_SIZE_OFFSET, max_size as u32);
    }

    fn set_parent_page_id(&mut self, parent_page_id: PageId) {
        write_u32(self.raw_mut(), PARENT_PAGE_ID_OFFSET, parent_page_id.as_u32());
    }

    fn set_page_id(&mut self, page_id: PageId) {
        write_u32(self.raw_mut(), PAGE_ID_OFFSET, page_id.as_u32());
    }
}

/// A tree page whose kind was read from its type tag.
pub enum TreePage<B> {
    Internal(InternalPage<B>),
    Leaf(LeafPage<B>),
}

impl<B: AsRef<[u8]>> TreePage<B> {
    /// Decodes the type tag. Unknown tags are a format error.
    pub fn from_data(data: B) -> Result<Self> {
        match page_type_of(data.as_ref())? {
            IndexPageType::Internal => Ok(Self::Internal(InternalPage::new(data))),
            IndexPageType::Leaf => Ok(Self::Leaf(LeafPage::new(data))),
        }
    }
}

impl<B: AsRef<[u8]>> TreeNode for TreePage<B> {
    fn raw(&self) -> &[u8] {
        match self {
            Self::Internal(page) => page.raw(),
            Self::Leaf(page) => page.raw(),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreeNodeMut for TreePage<B> {
    fn raw_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Internal(page) => page.raw_mut(),
            Self::Leaf(page) => page.raw_mut(),
        }
    }
}

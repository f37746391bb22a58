//! Free-space bitmap governing one extent of data pages.
//!
//! Layout:
//! ```text
//! | page_allocated (4) | next_free_page (4) | bits (PAGE_SIZE - 8) |
//! ```
//! Bit `i` lives in byte `i / 8` at position `i % 8`. A set bit means the
//! page at that offset inside the extent is in use.

use bytes::{Buf, BufMut};

use crate::common::{BurrowError, Result};

const PAGE_ALLOCATED_OFFSET: usize = 0;
const NEXT_FREE_PAGE_OFFSET: usize = 4;
pub const BITMAP_HEADER_SIZE: usize = 8;

/// Bitmap over the data area of a `PAGE_SIZE` byte page.
#[derive(Clone)]
pub struct BitmapPage<const PAGE_SIZE: usize> {
    data: Box<[u8; PAGE_SIZE]>,
}

impl<const PAGE_SIZE: usize> BitmapPage<PAGE_SIZE> {
    /// Creates an empty bitmap.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Number of pages one bitmap can track.
    pub const fn max_supported_size() -> usize {
        (PAGE_SIZE - BITMAP_HEADER_SIZE) * 8
    }

    /// Decodes a bitmap from a page image, rejecting counters that cannot
    /// describe this page size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(BurrowError::CorruptFormat(format!(
                "bitmap page is {} bytes, expected {PAGE_SIZE}",
                bytes.len()
            )));
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        let page = Self { data };

        let max = Self::max_supported_size();
        if page.page_allocated() as usize > max || page.next_free_page() as usize > max {
            return Err(BurrowError::CorruptFormat(format!(
                "bitmap counters out of range: allocated {}, next free {}",
                page.page_allocated(),
                page.next_free_page()
            )));
        }
        Ok(page)
    }

    /// Returns the raw page image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Number of pages currently marked in use.
    pub fn page_allocated(&self) -> u32 {
        (&self.data[PAGE_ALLOCATED_OFFSET..]).get_u32_le()
    }

    /// Offset the next allocation will hand out.
    pub fn next_free_page(&self) -> u32 {
        (&self.data[NEXT_FREE_PAGE_OFFSET..]).get_u32_le()
    }

    fn set_page_allocated(&mut self, count: u32) {
        (&mut self.data[PAGE_ALLOCATED_OFFSET..]).put_u32_le(count);
    }

    fn set_next_free_page(&mut self, offset: u32) {
        (&mut self.data[NEXT_FREE_PAGE_OFFSET..]).put_u32_le(offset);
    }

    pub fn is_full(&self) -> bool {
        self.page_allocated() as usize >= Self::max_supported_size()
    }

    /// Marks the hinted slot in use and returns its offset, or `None` when
    /// every slot is taken.
    pub fn allocate_page(&mut self) -> Option<u32> {
        if self.is_full() {
            return None;
        }

        let mut offset = self.next_free_page();
        if !self.is_page_free(offset) {
            // A stale hint: fall back to a full scan.
            offset = self.find_free_from(0)?;
        }

        self.set_bit(offset, true);
        self.set_page_allocated(self.page_allocated() + 1);

        // After the hinted slot is used, hand out the lowest free slot next.
        let next = self
            .find_free_from(0)
            .unwrap_or(Self::max_supported_size() as u32);
        self.set_next_free_page(next);

        Some(offset)
    }

    /// Clears the slot at `offset`. Returns false if it is out of range or
    /// already free.
    pub fn deallocate_page(&mut self, offset: u32) -> bool {
        if offset as usize >= Self::max_supported_size() || self.is_page_free(offset) {
            return false;
        }

        self.set_bit(offset, false);
        self.set_page_allocated(self.page_allocated() - 1);
        self.set_next_free_page(offset);
        true
    }

    /// Returns true if the slot is unused. Out-of-range offsets are never free.
    pub fn is_page_free(&self, offset: u32) -> bool {
        let offset = offset as usize;
        if offset >= Self::max_supported_size() {
            return false;
        }
        let byte = self.data[BITMAP_HEADER_SIZE + offset / 8];
        byte & (1 << (offset % 8)) == 0
    }

    fn set_bit(&mut self, offset: u32, used: bool) {
        let offset = offset as usize;
        let byte = &mut self.data[BITMAP_HEADER_SIZE + offset / 8];
        if used {
            *byte |= 1 << (offset % 8);
        } else {
            *byte &= !(1 << (offset % 8));
        }
    }

    /// Finds the first free slot at or after `start`, skipping whole bytes
    /// that are fully used.
    fn find_free_from(&self, start: u32) -> Option<u32> {
        let max = Self::max_supported_size();
        let mut offset = start as usize;
        while offset < max {
            let byte_index = offset / 8;
            let byte = self.data[BITMAP_HEADER_SIZE + byte_index];
            if byte == 0xFF {
                offset = (byte_index + 1) * 8;
                continue;
            }
            if byte & (1 << (offset % 8)) == 0 {
                return Some(offset as u32);
            }
            offset += 1;
        }
        None
    }
}

impl<const PAGE_SIZE: usize> Default for BitmapPage<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

//! Allocation metadata stored in physical page 0 of the database file.
//!
//! Layout:
//! ```text
//! | magic (4) | num_allocated_pages (4) | num_extents (4) | extent_used_page[MAX_EXTENTS] (4 each) |
//! ```

use bytes::{Buf, BufMut};

use crate::common::{BurrowError, Result, PAGE_SIZE};

/// "BURM"
pub const DISK_META_MAGIC: u32 = 0x4255_524D;

const META_HEADER_SIZE: usize = 12;

/// Number of extents whose usage fits in the metadata page.
pub const MAX_EXTENTS: usize = (PAGE_SIZE - META_HEADER_SIZE) / 4;

/// In-memory mirror of the metadata page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFileMetaPage {
    num_allocated_pages: u32,
    num_extents: u32,
    extent_used_page: Vec<u32>,
}

impl DiskFileMetaPage {
    pub fn new() -> Self {
        Self {
            num_allocated_pages: 0,
            num_extents: 0,
            extent_used_page: vec![0; MAX_EXTENTS],
        }
    }

    /// Decodes a metadata page. An all-zero page is a brand new file.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(BurrowError::CorruptFormat(format!(
                "meta page is {} bytes, expected {PAGE_SIZE}",
                data.len()
            )));
        }
        if data.iter().all(|&b| b == 0) {
            return Ok(Self::new());
        }

        let mut buf = data;
        let magic = buf.get_u32_le();
        if magic != DISK_META_MAGIC {
            return Err(BurrowError::CorruptFormat(format!(
                "bad meta page magic {magic:#010x}"
            )));
        }
        let num_allocated_pages = buf.get_u32_le();
        let num_extents = buf.get_u32_le();
        let extent_used_page: Vec<u32> = (0..MAX_EXTENTS).map(|_| buf.get_u32_le()).collect();

        let used_total: u64 = extent_used_page.iter().map(|&n| u64::from(n)).sum();
        let non_empty = extent_used_page.iter().filter(|&&n| n > 0).count();
        if used_total != u64::from(num_allocated_pages) || non_empty != num_extents as usize {
            return Err(BurrowError::CorruptFormat(format!(
                "meta page counters disagree: {num_allocated_pages} allocated, {num_extents} extents"
            )));
        }

        Ok(Self {
            num_allocated_pages,
            num_extents,
            extent_used_page,
        })
    }

    /// Encodes this page into a `PAGE_SIZE` buffer.
    pub fn write_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let mut buf = data;
        buf.put_u32_le(DISK_META_MAGIC);
        buf.put_u32_le(self.num_allocated_pages);
        buf.put_u32_le(self.num_extents);
        for &used in &self.extent_used_page {
            buf.put_u32_le(used);
        }
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.num_allocated_pages
    }

    /// Number of extents holding at least one allocated page.
    pub fn num_extents(&self) -> u32 {
        self.num_extents
    }

    pub fn extent_used_page(&self, extent: usize) -> u32 {
        self.extent_used_page.get(extent).copied().unwrap_or(0)
    }

    /// Records one allocation inside `extent`.
    pub fn record_allocation(&mut self, extent: usize) {
        if self.extent_used_page[extent] == 0 {
            self.num_extents += 1;
        }
        self.extent_used_page[extent] += 1;
        self.num_allocated_pages += 1;
    }

    /// Records one deallocation inside `extent`.
    pub fn record_deallocation(&mut self, extent: usize) {
        debug_assert!(self.extent_used_page[extent] > 0);
        self.extent_used_page[extent] -= 1;
        if self.extent_used_page[extent] == 0 {
            self.num_extents -= 1;
        }
        self.num_allocated_pages -= 1;
    }
}

impl Default for DiskFileMetaPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_page_is_fresh() {
        let meta = DiskFileMetaPage::from_bytes(&[0u8; PAGE_SIZE]).unwrap();
        assert_eq!(meta, DiskFileMetaPage::new());
    }

    #[test]
    fn test_counters_survive_encoding() {
        let mut meta = DiskFileMetaPage::new();
        meta.record_allocation(0);
        meta.record_allocation(0);
        meta.record_allocation(3);
        meta.record_deallocation(0);

        let mut data = [0u8; PAGE_SIZE];
        meta.write_to(&mut data);
        let decoded = DiskFileMetaPage::from_bytes(&data).unwrap();

        assert_eq!(decoded.num_allocated_pages(), 2);
        assert_eq!(decoded.num_extents(), 2);
        assert_eq!(decoded.extent_used_page(0), 1);
        assert_eq!(decoded.extent_used_page(3), 1);
        assert_eq!(decoded.extent_used_page(MAX_EXTENTS), 0);
    }

    #[test]
    fn test_bad_magic() {
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        assert!(matches!(
            DiskFileMetaPage::from_bytes(&data),
            Err(BurrowError::CorruptFormat(_))
        ));
    }
}

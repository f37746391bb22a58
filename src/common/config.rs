use super::error::{BurrowError, Result};
use super::types::{FrameId, PageId, RowId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Physical page holding the allocation metadata. Never handed out as a
/// logical id.
pub const META_PAGE_ID: u32 = 0;

/// Logical page holding the index root registry.
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(0);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

/// Header shared by every B+ tree page.
pub const TREE_PAGE_HEADER_SIZE: usize = 24;

/// Internal pages carry no fields beyond the shared header.
pub const INTERNAL_PAGE_HEADER_SIZE: usize = TREE_PAGE_HEADER_SIZE;

/// Width of a child pointer in an internal page.
pub const INTERNAL_VALUE_SIZE: usize = 4;

/// Shared header plus the next-leaf link.
pub const LEAF_PAGE_HEADER_SIZE: usize = TREE_PAGE_HEADER_SIZE + 4;

/// Sizing for one B+ tree: fixed key width and per-node capacities.
///
/// Capacities count entries; a page must hold `max_size + 1` entries so an
/// insert can overflow by one before the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConfig {
    /// Width of every key in bytes.
    pub key_size: usize,
    /// Maximum entries in a leaf page.
    pub leaf_max_size: usize,
    /// Maximum children in an internal page.
    pub internal_max_size: usize,
}

impl IndexConfig {
    /// Creates a configuration whose capacities fill a page for the given key width.
    pub fn new(key_size: usize) -> Self {
        Self {
            key_size,
            leaf_max_size: Self::default_leaf_max_size(key_size),
            internal_max_size: Self::default_internal_max_size(key_size),
        }
    }

    /// Sets the leaf capacity.
    pub fn with_leaf_max_size(mut self, max_size: usize) -> Self {
        self.leaf_max_size = max_size;
        self
    }

    /// Sets the internal capacity.
    pub fn with_internal_max_size(mut self, max_size: usize) -> Self {
        self.internal_max_size = max_size;
        self
    }

    fn leaf_pair_size(key_size: usize) -> usize {
        key_size + RowId::SIZE
    }

    fn internal_pair_size(key_size: usize) -> usize {
        key_size + INTERNAL_VALUE_SIZE
    }

    fn default_leaf_max_size(key_size: usize) -> usize {
        ((PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / Self::leaf_pair_size(key_size.max(1))).saturating_sub(1)
    }

    fn default_internal_max_size(key_size: usize) -> usize {
        ((PAGE_SIZE - INTERNAL_PAGE_HEADER_SIZE) / Self::internal_pair_size(key_size.max(1)))
            .saturating_sub(1)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(BurrowError::InvalidConfig("key_size must be > 0".into()));
        }
        if self.leaf_max_size < 2 {
            return Err(BurrowError::InvalidConfig(
                "leaf_max_size must be >= 2".into(),
            ));
        }
        // Below four, a non-root internal page may end up with one child
        // and no sibling to borrow from.
        if self.internal_max_size < 4 {
            return Err(BurrowError::InvalidConfig(
                "internal_max_size must be >= 4".into(),
            ));
        }

        let leaf_bytes = LEAF_PAGE_HEADER_SIZE
            + (self.leaf_max_size + 1) * Self::leaf_pair_size(self.key_size);
        if leaf_bytes > PAGE_SIZE {
            return Err(BurrowError::InvalidConfig(format!(
                "leaf_max_size {} does not fit a {PAGE_SIZE} byte page with {} byte keys",
                self.leaf_max_size, self.key_size
            )));
        }

        let internal_bytes = INTERNAL_PAGE_HEADER_SIZE
            + (self.internal_max_size + 1) * Self::internal_pair_size(self.key_size);
        if internal_bytes > PAGE_SIZE {
            return Err(BurrowError::InvalidConfig(format!(
                "internal_max_size {} does not fit a {PAGE_SIZE} byte page with {} byte keys",
                self.internal_max_size, self.key_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacities_fill_page() {
        let config = IndexConfig::new(4);
        assert_eq!(config.leaf_max_size, 338);
        assert_eq!(config.internal_max_size, 508);
        assert!(config.validate().is_ok());

        // One more entry than the default would not leave room for overflow.
        let config = IndexConfig::new(4).with_leaf_max_size(339);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = IndexConfig::new(8)
            .with_leaf_max_size(4)
            .with_internal_max_size(5);
        assert_eq!(config.key_size, 8);
        assert_eq!(config.leaf_max_size, 4);
        assert_eq!(config.internal_max_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(IndexConfig::new(0).validate().is_err());
        assert!(IndexConfig::new(4).with_leaf_max_size(1).validate().is_err());
        assert!(IndexConfig::new(4)
            .with_internal_max_size(3)
            .validate()
            .is_err());
        assert!(IndexConfig::new(PAGE_SIZE).validate().is_err());
    }
}

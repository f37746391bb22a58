//! Burrow - a disk-backed page store with a B+ tree index
//!
//! Pages live in a single file and are cached in a fixed-size buffer pool.
//! On top of the pool sits a B+ tree mapping fixed-width keys to row ids.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): the database file and the page formats that
//!   manage it
//!   - `DiskManager`: hands out logical page ids and performs page I/O
//!   - `BitmapPage`: free/used bitmap for one extent of pages
//!   - `DiskFileMetaPage`: per-extent allocation counts
//!   - `IndexRootsPage`: persistent index id to root page registry
//!
//! - **Buffer Pool** (`buffer`): caching of pages in memory
//!   - `BufferPoolManager`: fetches, creates, flushes and deletes pages
//!   - `LruReplacer`: least-recently-unpinned eviction
//!   - `PageGuard`: RAII handle that unpins its page on drop
//!
//! - **Index** (`index`): the B+ tree
//!   - `BPlusTree`: point lookup, insert, remove and ordered iteration
//!   - `InternalPage`/`LeafPage`: node layouts over raw page bytes
//!   - `IndexIterator`: cursor over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use burrow::buffer::BufferPoolManager;
//! use burrow::common::IndexConfig;
//! use burrow::index::{BPlusTree, IntegerComparator};
//! use burrow::storage::disk::DiskManager;
//! use burrow::{PageId, RowId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let mut tree = BPlusTree::new(0, bpm, IntegerComparator, IndexConfig::new(4)).unwrap();
//! tree.insert(&42u32.to_le_bytes(), RowId::new(PageId::new(7), 3)).unwrap();
//! assert_eq!(
//!     tree.get_value(&42u32.to_le_bytes()).unwrap(),
//!     Some(RowId::new(PageId::new(7), 3))
//! );
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BurrowError, PageId, Result, RowId};

use thiserror::Error;

use super::types::PageId;

/// Storage error types
#[derive(Error, Debug)]
pub enum BurrowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Out of memory: no buffer frame or disk page available")]
    OutOfMemory,

    #[error("Corrupt on-disk format: {0}")]
    CorruptFormat(String),

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index roots page is full")]
    IndexRootsFull,

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Disk manager is closed")]
    DiskClosed,
}

pub type Result<T> = std::result::Result<T, BurrowError>;

//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("buffer pool is full: no frame is evictable")]
    NoEvictableFrame,

    #[error("page {0} is not resident in the buffer pool")]
    PageNotResident(crate::storage::page::PageId),

    #[error("tuple not found: slot {slot} is empty or deleted")]
    TupleNotFound { slot: u16 },

    #[error("invalid slot: {slot} (slot count: {slot_count})")]
    InvalidSlot { slot: u16, slot_count: u16 },

    #[error("page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

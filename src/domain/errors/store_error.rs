//! Blob store error types.

use thiserror::Error;

/// Errors raised by a transactional blob store.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store is closed")]
    Closed,

    #[error("slot {index} out of range (store holds {value_count} values per entry)")]
    SlotOutOfRange { index: usize, value_count: usize },

    #[error("new entry is missing a value for slot {index}")]
    MissingSlot { index: usize },
}

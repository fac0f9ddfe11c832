//! Port definition for the persistent transactional blob store.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::CacheKey;
use crate::domain::errors::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Point-in-time copy of every slot of one entry.
#[derive(Debug, Clone)]
pub struct Snapshot {
    key: CacheKey,
    slots: Vec<Bytes>,
}

impl Snapshot {
    /// Creates a snapshot from slot values in index order.
    #[must_use]
    pub const fn new(key: CacheKey, slots: Vec<Bytes>) -> Self {
        Self { key, slots }
    }

    /// Key of the entry.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the value stored at `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&Bytes> {
        self.slots.get(index)
    }

    /// Consumes the snapshot, keeping only the value at `index`.
    #[must_use]
    pub fn into_slot(mut self, index: usize) -> Option<Bytes> {
        (index < self.slots.len()).then(|| self.slots.swap_remove(index))
    }
}

/// Ordered key-to-blob store with explicit edit transactions.
///
/// At most one editor may be open per key; a second `edit` for the same key
/// returns `None` until the first commits or aborts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns a snapshot of a committed entry, promoting it in the
    /// eviction order.
    async fn read(&self, key: &CacheKey) -> StoreResult<Option<Snapshot>>;

    /// Opens an editor for `key`, or `None` if one is already open.
    async fn edit(&self, key: &CacheKey) -> StoreResult<Option<Box<dyn BlobEditor>>>;

    /// Drops the committed entry for `key`. Returns false if there was none
    /// or an editor holds the key.
    async fn remove(&self, key: &CacheKey) -> StoreResult<bool>;

    /// Persists pending bookkeeping.
    async fn flush(&self) -> StoreResult<()>;

    /// Flushes and rejects every later operation.
    async fn close(&self) -> StoreResult<()>;
}

/// Staged write of one entry.
#[async_trait]
pub trait BlobEditor: Send {
    /// Appends `chunk` to the value staged for slot `index`.
    async fn write_slot(&mut self, index: usize, chunk: &[u8]) -> StoreResult<()>;

    /// Publishes every staged slot atomically.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discards staged data.
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::domain::errors::LoadResult;

/// Stream of body chunks; an `Err` item aborts the transfer.
pub type ByteStream = BoxStream<'static, LoadResult<Bytes>>;

/// Port for opening a byte stream for a resource identifier.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Opens a stream over the resource's bytes.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::Transport`] if the
    /// resource cannot be reached.
    async fn open_stream(&self, url: &str) -> LoadResult<ByteStream>;
}

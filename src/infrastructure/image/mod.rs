//! Image cache-and-fetch pipeline.
//!
//! This module provides:
//! - Size-aware memory caching with LRU eviction
//! - A transactional disk cache over a directory of blobs
//! - HTTP streaming and raster decoding adapters
//! - Fetch coordination, result dispatch and the loader context

pub mod blob_store;
pub mod codec;
pub mod coordination;
pub mod coordinator;
pub mod disk_cache;
pub mod dispatcher;
pub mod http_source;
pub mod loader;
pub mod memory_cache;
pub mod space_probe;
pub mod tags;
pub mod worker_pool;

#[cfg(test)]
pub(crate) mod test_support;

pub use blob_store::FileBlobStore;
pub use codec::{DEFAULT_MAX_DECODE_BYTES, RasterCodec};
pub use coordination::CoordinationThread;
pub use coordinator::{FetchCoordinator, FetchStage};
pub use disk_cache::DiskCache;
pub use dispatcher::{DispatchStats, ResultDispatcher};
pub use http_source::HttpByteSource;
pub use loader::{ImageLoader, ImageLoaderBuilder, SetupError};
pub use memory_cache::{
    CacheStats, FALLBACK_CAPACITY_KB, MemoryCache, MemoryCacheConfig, RowBytesKb, SizeOf,
    default_capacity_kb,
};
pub use space_probe::SystemSpaceProbe;
pub use tags::TagRegistry;
pub use worker_pool::WorkerPool;

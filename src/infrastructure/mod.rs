//! Infrastructure layer with adapters for storage, network and decoding.

/// Loader configuration.
pub mod config;
/// Image cache-and-fetch pipeline.
pub mod image;
/// Tracing subscriber setup.
pub mod logging;

pub use config::{ConfigError, ConfigStorage, LoaderConfig, LogLevel};
pub use image::{
    CacheStats, DiskCache, FileBlobStore, HttpByteSource, ImageLoader, ImageLoaderBuilder,
    MemoryCache, RasterCodec, ResultDispatcher, SetupError, SystemSpaceProbe,
};
pub use logging::{LoggingError, init_logging};

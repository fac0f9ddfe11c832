//! Loader configuration.

pub mod loader_config;
pub mod storage;

pub use loader_config::{
    DEFAULT_DISK_CACHE_SIZE, DEFAULT_DISK_CACHE_VERSION, DiskConfig, LoaderConfig, LogLevel,
    MemoryConfig, NetworkConfig, PoolConfig,
};
pub(crate) use loader_config::APP_NAME;
pub use storage::{ConfigError, ConfigStorage};

//! Loader configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::entities::KeyScheme;
use crate::domain::services::SamplingMode;

pub(crate) const APP_NAME: &str = "pixfetch";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Default disk cache budget (50 MiB).
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Default on-disk format version.
pub const DEFAULT_DISK_CACHE_VERSION: u32 = 1;

/// Default idle time before extra blocking workers are reaped.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 10;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Loader configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Axis pairing used by the sampler.
    #[serde(default)]
    pub sampling: SamplingMode,

    /// Cache key derivation scheme.
    #[serde(default)]
    pub key_scheme: KeyScheme,

    /// Memory cache configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Disk cache configuration.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Memory cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Capacity in KiB. Defaults to one eighth of the process memory budget.
    #[serde(default)]
    pub capacity_kb: Option<usize>,
}

/// Disk cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Cache directory. Defaults to `<platform cache dir>/bitmap`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Byte budget of the store.
    #[serde(default = "default_disk_capacity")]
    pub capacity_bytes: u64,

    /// On-disk format version; changing it wipes existing entries.
    #[serde(default = "default_disk_version")]
    pub version: u32,
}

impl DiskConfig {
    /// Returns the configured directory or the platform default.
    #[must_use]
    pub fn effective_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_dir)
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            directory: None,
            capacity_bytes: DEFAULT_DISK_CACHE_SIZE,
            version: DEFAULT_DISK_CACHE_VERSION,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Async worker threads. Defaults to CPU count + 1.
    #[serde(default)]
    pub core_threads: Option<usize>,

    /// Blocking pool ceiling. Defaults to 2 x CPU count + 1.
    #[serde(default)]
    pub max_threads: Option<usize>,

    /// Idle seconds before a blocking worker exits.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl PoolConfig {
    /// Returns the worker thread count.
    #[must_use]
    pub fn effective_core_threads(&self) -> usize {
        self.core_threads.unwrap_or_else(|| cpu_count() + 1).max(1)
    }

    /// Returns the blocking thread ceiling.
    #[must_use]
    pub fn effective_max_threads(&self) -> usize {
        self.max_threads
            .unwrap_or_else(|| cpu_count() * 2 + 1)
            .max(1)
    }

    /// Returns the keep-alive as a duration.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_threads: None,
            max_threads: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

const fn default_disk_capacity() -> u64 {
    DEFAULT_DISK_CACHE_SIZE
}

const fn default_disk_version() -> u32 {
    DEFAULT_DISK_CACHE_VERSION
}

const fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

const fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION"))
}

fn cpu_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Returns the default cache directory path.
fn default_cache_dir() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("cache").join("bitmap"),
        |dirs| dirs.cache_dir().join("bitmap"),
    )
}

//! Size-aware in-memory LRU cache of decoded images.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;

/// Fallback capacity when the memory budget cannot be probed (64 MiB).
pub const FALLBACK_CAPACITY_KB: usize = 64 * 1024;

/// Strategy measuring how much of the capacity an image occupies.
pub trait SizeOf: Send + Sync {
    /// Returns the accounted size of `image` in KiB.
    fn size_of(&self, key: &CacheKey, image: &DynamicImage) -> usize;
}

/// `(row stride * height) / 1024`, where the row stride is
/// `width * bytes per pixel`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowBytesKb;

impl SizeOf for RowBytesKb {
    fn size_of(&self, _key: &CacheKey, image: &DynamicImage) -> usize {
        let stride = u64::from(image.width()) * u64::from(image.color().bytes_per_pixel());
        usize::try_from(stride * u64::from(image.height()) / 1024).unwrap_or(usize::MAX)
    }
}

/// Construction parameters for [`MemoryCache`].
#[derive(Clone)]
pub struct MemoryCacheConfig {
    /// Total capacity in KiB.
    pub capacity_kb: usize,
    /// Sizing strategy.
    pub size_of: Arc<dyn SizeOf>,
}

impl MemoryCacheConfig {
    /// Config with the given capacity and the [`RowBytesKb`] strategy.
    #[must_use]
    pub fn with_capacity_kb(capacity_kb: usize) -> Self {
        Self {
            capacity_kb,
            size_of: Arc::new(RowBytesKb),
        }
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self::with_capacity_kb(default_capacity_kb())
    }
}

impl std::fmt::Debug for MemoryCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheConfig")
            .field("capacity_kb", &self.capacity_kb)
            .finish_non_exhaustive()
    }
}

/// One eighth of the process memory budget, in KiB.
///
/// The budget is the cgroup memory limit when one applies, otherwise the
/// total system memory.
#[must_use]
pub fn default_capacity_kb() -> usize {
    let mut system = sysinfo::System::new();
    system.refresh_memory();

    let budget = system
        .cgroup_limits()
        .map(|limits| limits.total_memory)
        .filter(|total| *total > 0)
        .unwrap_or_else(|| system.total_memory());

    if budget == 0 {
        return FALLBACK_CAPACITY_KB;
    }
    usize::try_from(budget / 1024 / 8).unwrap_or(FALLBACK_CAPACITY_KB)
}

struct Entry {
    image: Arc<DynamicImage>,
    size_kb: usize,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    size_kb: usize,
}

/// In-memory LRU cache for decoded images, bounded by accounted size.
/// Thread-safe; every operation is synchronous.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    capacity_kb: usize,
    size_of: Arc<dyn SizeOf>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache from `config`.
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                size_kb: 0,
            }),
            capacity_kb: config.capacity_kb,
            size_of: config.size_of,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the given capacity and the default strategy.
    #[must_use]
    pub fn with_capacity_kb(capacity_kb: usize) -> Self {
        Self::new(MemoryCacheConfig::with_capacity_kb(capacity_kb))
    }

    /// Returns the cached image and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(Arc::clone(&entry.image))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let inner = self.inner.lock();
        inner.entries.peek(key).map(|entry| Arc::clone(&entry.image))
    }

    /// Inserts `image` unless `key` is already cached (first writer wins).
    ///
    /// Evicts least-recently-used entries until the new total fits. An image
    /// larger than the whole capacity is kept alone. Returns true if the
    /// image was inserted.
    pub fn put(&self, key: CacheKey, image: Arc<DynamicImage>) -> bool {
        let size_kb = self.size_of.size_of(&key, &image);
        let mut inner = self.inner.lock();

        if inner.entries.get(&key).is_some() {
            trace!(key = %key, "Memory cache already holds key, keeping first entry");
            return false;
        }

        debug!(key = %key, size_kb, "Storing image in memory cache");
        inner.entries.push(key, Entry { image, size_kb });
        inner.size_kb = inner.size_kb.saturating_add(size_kb);

        while inner.size_kb > self.capacity_kb && inner.entries.len() > 1 {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.size_kb -= entry.size_kb;
            debug!(key = %evicted, size_kb = entry.size_kb, "Evicted image from memory cache");
        }
        true
    }

    /// Removes an image from the cache.
    pub fn evict(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.size_kb -= entry.size_kb;
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Clears all images from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_kb = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the accounted size of all entries in KiB.
    #[must_use]
    pub fn size_kb(&self) -> usize {
        self.inner.lock().size_kb
    }

    /// Returns the configured capacity in KiB.
    #[must_use]
    pub const fn capacity_kb(&self) -> usize {
        self.capacity_kb
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (entries, size_kb) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.size_kb)
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            entries,
            size_kb,
            capacity_kb: self.capacity_kb,
        }
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity_kb", &self.capacity_kb)
            .field("size_kb", &self.size_kb())
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub entries: usize,
    /// Accounted size in KiB.
    pub size_kb: usize,
    /// Capacity in KiB.
    pub capacity_kb: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} KiB, {:.1}% hit rate ({} hits, {} misses)",
            self.entries, self.size_kb, self.capacity_kb, self.hit_rate, self.hits, self.misses
        )
    }
}

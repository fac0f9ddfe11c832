//! Fetch coordination across both cache tiers and the network.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use image::DynamicImage;
use tracing::{debug, instrument, trace, warn};

use crate::domain::entities::{CacheKey, Dimensions, ImageSource, LoadedImage};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{ByteSource, ByteStream, ImageCodec};
use crate::domain::services::{SamplingMode, sample_factor};

use super::coordination::CoordinationThread;
use super::disk_cache::DiskCache;
use super::memory_cache::MemoryCache;

/// Stage of one fetch, recorded on log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    /// Synchronous memory lookup.
    MemCheck,
    /// Disk cache lookup.
    DiskCheck,
    /// Opening the network stream.
    NetworkFetch,
    /// Streaming into a disk transaction.
    DiskWriteBack,
    /// Reading the committed entry back.
    DiskReread,
    /// Probe, sample and decode.
    Decode,
    /// Image produced.
    Done,
    /// Every tier failed.
    Failed,
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MemCheck => "mem_check",
            Self::DiskCheck => "disk_check",
            Self::NetworkFetch => "network_fetch",
            Self::DiskWriteBack => "disk_write_back",
            Self::DiskReread => "disk_reread",
            Self::Decode => "decode",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs the memory → disk → network → write-back → re-read → decode chain.
pub struct FetchCoordinator {
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    source: Arc<dyn ByteSource>,
    codec: Arc<dyn ImageCodec>,
    sampling: SamplingMode,
    coordination: CoordinationThread,
}

impl FetchCoordinator {
    /// Creates a coordinator over the given tiers.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryCache>,
        disk: Arc<DiskCache>,
        source: Arc<dyn ByteSource>,
        codec: Arc<dyn ImageCodec>,
        sampling: SamplingMode,
        coordination: CoordinationThread,
    ) -> Self {
        Self {
            memory,
            disk,
            source,
            codec,
            sampling,
            coordination,
        }
    }

    /// Memory lookup. Safe on any thread.
    #[must_use]
    pub fn check_memory(&self, key: &CacheKey) -> Option<LoadedImage> {
        let Some(image) = self.memory.get(key) else {
            trace!(key = %key, stage = %FetchStage::MemCheck, "Memory cache miss");
            return None;
        };
        trace!(key = %key, stage = %FetchStage::MemCheck, "Memory cache hit");
        Some(LoadedImage {
            key: key.clone(),
            image,
            source: ImageSource::MemoryCache,
        })
    }

    /// Loads `url` from disk or network and populates the memory cache.
    ///
    /// Transport, store and decode failures are logged and yield `None`.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] when called on the coordination
    /// thread.
    #[instrument(level = "debug", skip_all, fields(url = %url, key = %key))]
    pub async fn fetch(
        &self,
        url: &str,
        key: &CacheKey,
        requested: Dimensions,
    ) -> LoadResult<Option<LoadedImage>> {
        match self.run(url, key, requested).await {
            Ok(loaded) => {
                debug!(stage = %FetchStage::Done, source = %loaded.source, "Image loaded");
                Ok(Some(loaded))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(url = %url, stage = %FetchStage::Failed, error = %e, "Image load failed");
                Ok(None)
            }
        }
    }

    async fn run(&self, url: &str, key: &CacheKey, requested: Dimensions) -> LoadResult<LoadedImage> {
        self.coordination.ensure_off("disk lookup")?;
        match self.disk.read(key).await {
            Ok(Some(bytes)) => {
                debug!(stage = %FetchStage::DiskCheck, "Disk cache hit");
                return self
                    .decode_stored(key, bytes, requested, ImageSource::DiskCache)
                    .await;
            }
            Ok(None) => trace!(stage = %FetchStage::DiskCheck, "Disk cache miss"),
            Err(e) => warn!(stage = %FetchStage::DiskCheck, error = %e, "Disk lookup failed"),
        }

        self.coordination.ensure_off("network fetch")?;
        if !self.disk.is_enabled() {
            debug!(stage = %FetchStage::NetworkFetch, "Fetching without disk cache");
            let bytes = collect(self.source.open_stream(url).await?).await?;
            return self
                .decode(key, bytes, requested, ImageSource::Network)
                .await;
        }

        let editor = self.disk.edit(key).await?;
        debug!(stage = %FetchStage::NetworkFetch, "Fetching into disk cache");
        let written = match self.source.open_stream(url).await {
            Ok(stream) => {
                trace!(stage = %FetchStage::DiskWriteBack, "Streaming body");
                self.disk.commit_stream(editor, stream).await
            }
            Err(e) => {
                self.disk.abort(editor).await;
                Err(e)
            }
        };
        if let Ok(size) = &written {
            debug!(stage = %FetchStage::DiskWriteBack, size, "Committed to disk cache");
        }

        trace!(stage = %FetchStage::DiskReread, "Re-reading committed entry");
        let source = if written.is_ok() {
            ImageSource::Network
        } else {
            ImageSource::DiskCache
        };
        match self.disk.read(key).await? {
            Some(bytes) => self.decode_stored(key, bytes, requested, source).await,
            None => Err(written.err().unwrap_or_else(|| {
                LoadError::store_unavailable("entry missing after write-back")
            })),
        }
    }

    /// Decodes bytes read from disk, dropping the entry when they are not an
    /// image so the next request goes back to the network.
    async fn decode_stored(
        &self,
        key: &CacheKey,
        bytes: Bytes,
        requested: Dimensions,
        source: ImageSource,
    ) -> LoadResult<LoadedImage> {
        let decoded = self.decode(key, bytes, requested, source).await;
        if matches!(decoded, Err(LoadError::Decode { .. })) {
            match self.disk.remove(key).await {
                Ok(true) => warn!(stage = %FetchStage::Decode, "Removed undecodable disk cache entry"),
                Ok(false) => {}
                Err(e) => warn!(stage = %FetchStage::Decode, error = %e, "Failed to remove undecodable entry"),
            }
        }
        decoded
    }

    async fn decode(
        &self,
        key: &CacheKey,
        bytes: Bytes,
        requested: Dimensions,
        source: ImageSource,
    ) -> LoadResult<LoadedImage> {
        self.coordination.ensure_off("decode")?;
        let codec = Arc::clone(&self.codec);
        let mode = self.sampling;

        let decoded = tokio::task::spawn_blocking(move || -> LoadResult<DynamicImage> {
            let dimensions = codec.probe_dimensions(&bytes)?;
            let factor = sample_factor(dimensions, requested, mode);
            trace!(stage = %FetchStage::Decode, %dimensions, %requested, factor, "Decoding");
            codec.decode(&bytes, factor)
        })
        .await
        .map_err(|e| LoadError::decode(format!("decode task failed: {e}")))??;

        let image = Arc::new(decoded);
        let image = if self.memory.put(key.clone(), Arc::clone(&image)) {
            image
        } else {
            // first writer wins; hand out the cached copy
            self.memory.peek(key).unwrap_or(image)
        };

        Ok(LoadedImage {
            key: key.clone(),
            image,
            source,
        })
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("disk", &self.disk)
            .field("sampling", &self.sampling)
            .finish_non_exhaustive()
    }
}

async fn collect(mut stream: ByteStream) -> LoadResult<Bytes> {
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{CountingCodec, CountingStore, StaticByteSource};
    use crate::domain::ports::{BlobEditor, BlobStore};
    use crate::infrastructure::image::codec::RasterCodec;
    use crate::infrastructure::image::test_support::{blob_files, counting_store, disk_over, png};
    use tempfile::TempDir;

    const URL: &str = "http://x/1.png";

    struct Fixture {
        dir: TempDir,
        store: Arc<CountingStore>,
        source: Arc<StaticByteSource>,
        codec: Arc<CountingCodec<RasterCodec>>,
        memory: Arc<MemoryCache>,
        coordination: CoordinationThread,
        coordinator: FetchCoordinator,
    }

    fn fixture(disk_enabled: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = counting_store(&dir);
        let disk = if disk_enabled {
            disk_over(&dir, &store)
        } else {
            Arc::new(DiskCache::disabled(dir.path()))
        };
        let source = Arc::new(StaticByteSource::new());
        let codec = Arc::new(CountingCodec::new(RasterCodec::default()));
        let memory = Arc::new(MemoryCache::with_capacity_kb(4096));
        let coordination = CoordinationThread::new();
        let coordinator = FetchCoordinator::new(
            memory.clone(),
            disk,
            source.clone(),
            codec.clone(),
            SamplingMode::Legacy,
            coordination.clone(),
        );
        Fixture {
            dir,
            store,
            source,
            codec,
            memory,
            coordination,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_network_fetch_writes_back_then_rereads() {
        let f = fixture(true);
        f.source.serve(URL, png(64, 64));
        let key = CacheKey::from_url(URL);

        let loaded = f
            .coordinator
            .fetch(URL, &key, Dimensions::new(16, 16))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(f.source.opens(), 1);
        assert_eq!(f.store.commits(), 1);
        assert_eq!(f.store.read_misses(), 1);
        assert_eq!(f.store.read_hits(), 1);
        assert_eq!(f.codec.factors(), vec![2]);
        assert_eq!((loaded.image.width(), loaded.image.height()), (32, 32));
        assert!(f.memory.peek(&key).is_some());
    }

    #[tokio::test]
    async fn test_disk_hit_skips_network() {
        let f = fixture(true);
        f.source.serve(URL, png(8, 8));
        let key = CacheKey::from_url(URL);
        f.coordinator
            .fetch(URL, &key, Dimensions::NATURAL)
            .await
            .unwrap();
        f.memory.clear();

        let loaded = f
            .coordinator
            .fetch(URL, &key, Dimensions::NATURAL)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(f.source.opens(), 1);
        assert_eq!(f.store.commits(), 1);
    }

    #[tokio::test]
    async fn test_disabled_disk_decodes_stream_directly() {
        let f = fixture(false);
        f.source.serve(URL, png(64, 64));
        let key = CacheKey::from_url(URL);

        let loaded = f
            .coordinator
            .fetch(URL, &key, Dimensions::new(16, 16))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(f.store.edits(), 0);
        assert_eq!(f.codec.decodes(), 1);
        assert!(f.coordinator.check_memory(&key).is_some());
    }

    #[tokio::test]
    async fn test_decode_failure_is_absorbed() {
        let f = fixture(true);
        f.source.serve(URL, Bytes::from_static(b"not an image at all"));
        let key = CacheKey::from_url(URL);

        let loaded = f
            .coordinator
            .fetch(URL, &key, Dimensions::NATURAL)
            .await
            .unwrap();

        assert!(loaded.is_none());
        assert_eq!(f.codec.probes(), 1);
        assert!(f.memory.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped_and_refetched() {
        let f = fixture(true);
        f.source.serve(URL, Bytes::from_static(b"<html>502 bad gateway</html>"));
        let key = CacheKey::from_url(URL);

        let first = f
            .coordinator
            .fetch(URL, &key, Dimensions::NATURAL)
            .await
            .unwrap();
        assert!(first.is_none());
        assert_eq!(f.store.commits(), 1);
        assert_eq!(f.store.removals(), 1);
        assert_eq!(blob_files(&f.dir), vec!["VERSION".to_string()]);

        f.source.serve(URL, png(8, 8));
        let second = f
            .coordinator
            .fetch(URL, &key, Dimensions::new(8, 8))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.source, ImageSource::Network);
        assert_eq!(second.image.width(), 8);
        assert_eq!(f.source.opens(), 2);
        assert_eq!(f.store.commits(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_url_aborts_edit() {
        let f = fixture(true);
        let key = CacheKey::from_url(URL);

        let loaded = f
            .coordinator
            .fetch(URL, &key, Dimensions::NATURAL)
            .await
            .unwrap();

        assert!(loaded.is_none());
        assert_eq!(f.source.opens(), 1);
        assert_eq!(f.store.edits(), 1);
        assert_eq!(f.store.aborts(), 1);
        assert_eq!(f.store.commits(), 0);
        assert_eq!(f.store.read_misses(), 2);
        assert_eq!(blob_files(&f.dir), vec!["VERSION".to_string()]);
        assert!(f.memory.is_empty());
    }

    #[tokio::test]
    async fn test_busy_editor_fails_without_fetching() {
        let f = fixture(true);
        f.source.serve(URL, png(8, 8));
        let key = CacheKey::from_url(URL);
        let held = f.store.edit(&key).await.unwrap().unwrap();

        let loaded = f
            .coordinator
            .fetch(URL, &key, Dimensions::NATURAL)
            .await
            .unwrap();

        assert!(loaded.is_none());
        assert_eq!(f.source.opens(), 0);
        assert_eq!(f.store.busy(), 1);
        held.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_refuses_coordination_thread() {
        let f = fixture(true);
        f.coordination.claim("pump").unwrap();

        let result = f
            .coordinator
            .fetch(URL, &CacheKey::from_url(URL), Dimensions::NATURAL)
            .await;

        assert!(matches!(
            result,
            Err(LoadError::WrongThread { operation: "disk lookup" })
        ));
        assert_eq!(f.store.read_misses() + f.store.read_hits(), 0);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(FetchStage::DiskWriteBack.to_string(), "disk_write_back");
        assert_eq!(FetchStage::MemCheck.to_string(), "mem_check");
    }
}

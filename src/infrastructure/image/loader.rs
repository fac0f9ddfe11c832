//! Image loading context.
//!
//! Lookup order is memory, then disk, then network. One [`ImageLoader`] is
//! built per application and handed to every caller.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::entities::{CacheKey, Dimensions, KeyScheme, LoadOutcome, LoadedImage, TargetId};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{BlobStore, ByteSource, DisplaySurface, ImageCodec, SpaceProbe};
use crate::infrastructure::config::LoaderConfig;

use super::codec::RasterCodec;
use super::coordination::CoordinationThread;
use super::coordinator::FetchCoordinator;
use super::disk_cache::DiskCache;
use super::dispatcher::ResultDispatcher;
use super::http_source::HttpByteSource;
use super::memory_cache::{
    CacheStats, MemoryCache, MemoryCacheConfig, RowBytesKb, SizeOf, default_capacity_kb,
};
use super::space_probe::SystemSpaceProbe;
use super::tags::TagRegistry;
use super::worker_pool::WorkerPool;

/// How long `shutdown` waits for in-flight fetches.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while building a loader.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SetupError {
    #[error("failed to start worker pool: {0}")]
    Pool(#[source] std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Builder for [`ImageLoader`]. Every port defaults to its bundled adapter.
pub struct ImageLoaderBuilder {
    config: LoaderConfig,
    byte_source: Option<Arc<dyn ByteSource>>,
    codec: Option<Arc<dyn ImageCodec>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    space_probe: Option<Arc<dyn SpaceProbe>>,
    size_of: Option<Arc<dyn SizeOf>>,
}

impl ImageLoaderBuilder {
    /// Replaces the HTTP byte source.
    #[must_use]
    pub fn byte_source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.byte_source = Some(source);
        self
    }

    /// Replaces the raster codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Replaces the file blob store. The free-space check still applies.
    #[must_use]
    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    /// Replaces the free-space probe.
    #[must_use]
    pub fn space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = Some(probe);
        self
    }

    /// Replaces the memory cache sizing strategy.
    #[must_use]
    pub fn size_of(mut self, size_of: Arc<dyn SizeOf>) -> Self {
        self.size_of = Some(size_of);
        self
    }

    /// Builds the loader and the dispatcher that owns `surface`.
    ///
    /// A disk cache that cannot be opened is disabled rather than reported.
    ///
    /// # Errors
    /// Returns [`SetupError`] if the worker pool or the HTTP client cannot
    /// be created.
    pub fn build<S: DisplaySurface>(
        self,
        surface: S,
    ) -> Result<(ImageLoader, ResultDispatcher<S>), SetupError> {
        let Self {
            config,
            byte_source,
            codec,
            blob_store,
            space_probe,
            size_of,
        } = self;

        let source: Arc<dyn ByteSource> = match byte_source {
            Some(source) => source,
            None => Arc::new(HttpByteSource::new(&config.network)?),
        };
        let codec: Arc<dyn ImageCodec> = match codec {
            Some(codec) => codec,
            None => Arc::new(RasterCodec::default()),
        };
        let size_of: Arc<dyn SizeOf> = match size_of {
            Some(size_of) => size_of,
            None => Arc::new(RowBytesKb),
        };
        let probe: Arc<dyn SpaceProbe> = match space_probe {
            Some(probe) => probe,
            None => Arc::new(SystemSpaceProbe),
        };

        let capacity_kb = config.memory.capacity_kb.unwrap_or_else(default_capacity_kb);
        let memory = Arc::new(MemoryCache::new(MemoryCacheConfig {
            capacity_kb,
            size_of,
        }));

        let disk = Arc::new(match blob_store {
            Some(store) => DiskCache::open_with(&config.disk, probe.as_ref(), |_, _| Ok(store)),
            None => DiskCache::open(&config.disk, probe.as_ref()),
        });

        let pool = WorkerPool::new(&config.pool).map_err(SetupError::Pool)?;
        let coordination = CoordinationThread::new();
        let tags = TagRegistry::new();
        let (outcomes, receiver) = mpsc::unbounded_channel();

        let coordinator = Arc::new(FetchCoordinator::new(
            Arc::clone(&memory),
            Arc::clone(&disk),
            source,
            codec,
            config.sampling,
            coordination.clone(),
        ));

        info!(
            capacity_kb,
            disk_enabled = disk.is_enabled(),
            sampling = ?config.sampling,
            "Image loader ready"
        );

        let loader = ImageLoader {
            coordinator,
            memory,
            disk,
            tags: tags.clone(),
            outcomes,
            pool,
            key_scheme: config.key_scheme,
            coordination: coordination.clone(),
        };
        let dispatcher = ResultDispatcher::new(receiver, tags, surface, coordination);
        Ok((loader, dispatcher))
    }
}

/// Two-tier image cache and fetch pipeline.
pub struct ImageLoader {
    coordinator: Arc<FetchCoordinator>,
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    tags: TagRegistry,
    outcomes: mpsc::UnboundedSender<LoadOutcome>,
    pool: WorkerPool,
    key_scheme: KeyScheme,
    coordination: CoordinationThread,
}

impl ImageLoader {
    /// Starts a builder from `config`.
    #[must_use]
    pub fn builder(config: LoaderConfig) -> ImageLoaderBuilder {
        ImageLoaderBuilder {
            config,
            byte_source: None,
            codec: None,
            blob_store: None,
            space_probe: None,
            size_of: None,
        }
    }

    /// Derives the cache key of `url` with the configured scheme.
    #[must_use]
    pub fn key_for(&self, url: &str) -> CacheKey {
        CacheKey::derive(url, self.key_scheme)
    }

    /// Shows `url` on `target` once loaded, scaled toward `requested`.
    ///
    /// Returns immediately. The result reaches the surface through the
    /// dispatcher, and only if `target` has not been rebound in between.
    pub fn bind(&self, url: &str, target: TargetId, requested: Dimensions) {
        self.tags.tag(target, url);
        let key = self.key_for(url);

        if let Some(hit) = self.coordinator.check_memory(&key) {
            self.send(LoadOutcome {
                target,
                url: url.to_string(),
                image: Some(hit),
            });
            return;
        }

        let coordinator = Arc::clone(&self.coordinator);
        let outcomes = self.outcomes.clone();
        let url = url.to_string();
        self.pool.spawn(async move {
            let image = match coordinator.fetch(&url, &key, requested).await {
                Ok(image) => image,
                Err(e) => {
                    warn!(url = %url, error = %e, "Fetch refused");
                    None
                }
            };
            if outcomes.send(LoadOutcome { target, url, image }).is_err() {
                debug!(target = %target, "Dispatcher gone, dropping outcome");
            }
        });
    }

    /// [`Self::bind`] with a zero request, which downsamples to the coarsest
    /// power-of-two factor the sampler allows.
    pub fn bind_natural(&self, url: &str, target: TargetId) {
        self.bind(url, target, Dimensions::NATURAL);
    }

    /// Forgets what `target` wants; pending results for it are discarded.
    pub fn unbind(&self, target: TargetId) {
        self.tags.untag(target);
    }

    /// Returns the url `target` currently wants.
    #[must_use]
    pub fn wanted(&self, target: TargetId) -> Option<String> {
        self.tags.current(target)
    }

    fn send(&self, outcome: LoadOutcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!("Dispatcher gone, dropping outcome");
        }
    }

    /// Loads `url` without a display target.
    ///
    /// Resolves to `None` when every tier fails.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] if the fetch was refused.
    pub async fn load(&self, url: &str, requested: Dimensions) -> LoadResult<Option<LoadedImage>> {
        let key = self.key_for(url);
        if let Some(hit) = self.coordinator.check_memory(&key) {
            return Ok(Some(hit));
        }

        let coordinator = Arc::clone(&self.coordinator);
        let url = url.to_string();
        let task = self
            .pool
            .spawn(async move { coordinator.fetch(&url, &key, requested).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Fetch task did not complete");
                Ok(None)
            }
        }
    }

    /// Blocking [`Self::load`] for plain threads.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] on the coordination thread or
    /// inside an async runtime.
    pub fn load_blocking(
        &self,
        url: &str,
        requested: Dimensions,
    ) -> LoadResult<Option<LoadedImage>> {
        if self.coordination.is_current() || Handle::try_current().is_ok() {
            return Err(LoadError::wrong_thread("load_blocking"));
        }
        self.pool.block_on(self.load(url, requested))
    }

    /// Warms both tiers for `url` in the background.
    pub fn prefetch(&self, url: &str, requested: Dimensions) {
        let key = self.key_for(url);
        if self.memory.peek(&key).is_some() {
            return;
        }
        let coordinator = Arc::clone(&self.coordinator);
        let url = url.to_string();
        self.pool.spawn(async move {
            if let Err(e) = coordinator.fetch(&url, &key, requested).await {
                warn!(url = %url, error = %e, "Prefetch refused");
            }
        });
    }

    /// Memory cache counters.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Returns true if the disk tier is active.
    #[must_use]
    pub fn disk_enabled(&self) -> bool {
        self.disk.is_enabled()
    }

    /// Drops every decoded image from memory.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Flushes and closes the disk store. Later fetches skip the disk.
    ///
    /// # Errors
    /// Returns [`LoadError::StoreUnavailable`] if the store fails to close.
    pub async fn close_store(&self) -> LoadResult<()> {
        self.disk.close().await
    }

    /// Closes the disk store, then stops the worker pool.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] inside an async runtime, or
    /// [`LoadError::StoreUnavailable`] if the store fails to close.
    pub fn shutdown(self) -> LoadResult<()> {
        if Handle::try_current().is_ok() {
            return Err(LoadError::wrong_thread("shutdown"));
        }
        let closed = self.pool.block_on(self.disk.close());
        let Self { pool, .. } = self;
        pool.shutdown(SHUTDOWN_TIMEOUT);
        info!("Image loader shut down");
        closed
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("key_scheme", &self.key_scheme)
            .field("disk", &self.disk)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{CountingCodec, CountingStore, MockSpaceProbe, StaticByteSource};
    use crate::domain::ports::{BlobEditor, BlobStore};
    use crate::infrastructure::config::PoolConfig;
    use crate::infrastructure::image::blob_store::FileBlobStore;
    use crate::infrastructure::image::test_support::{blob_files, counting_store, png};
    use crate::domain::entities::ImageSource;
    use image::DynamicImage;
    use tempfile::TempDir;

    const URL: &str = "http://x/1.png";
    const OTHER_URL: &str = "http://x/2.png";

    #[derive(Default)]
    struct Recorder(Vec<(TargetId, Arc<DynamicImage>)>);

    impl DisplaySurface for Recorder {
        fn set_image(&mut self, target: TargetId, image: Arc<DynamicImage>) {
            self.0.push((target, image));
        }
    }

    struct Harness {
        dir: TempDir,
        store: Arc<CountingStore>,
        source: Arc<StaticByteSource>,
        codec: Arc<CountingCodec<RasterCodec>>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                store: counting_store(&dir),
                source: Arc::new(StaticByteSource::new()),
                codec: Arc::new(CountingCodec::new(RasterCodec::default())),
                dir,
            }
        }

        fn config(&self) -> LoaderConfig {
            let mut config = LoaderConfig::default();
            config.disk.directory = Some(self.dir.path().join("bitmap"));
            config.memory.capacity_kb = Some(16 * 1024);
            config.pool = PoolConfig {
                core_threads: Some(2),
                max_threads: Some(2),
                keep_alive_secs: 1,
            };
            config
        }

        fn build_with(&self, free_space: u64) -> (ImageLoader, ResultDispatcher<Recorder>) {
            let mut probe = MockSpaceProbe::new();
            probe.expect_usable_space().returning(move |_| Ok(free_space));

            ImageLoader::builder(self.config())
                .byte_source(self.source.clone())
                .codec(self.codec.clone())
                .blob_store(self.store.clone())
                .space_probe(Arc::new(probe))
                .build(Recorder::default())
                .unwrap()
        }

        fn build(&self) -> (ImageLoader, ResultDispatcher<Recorder>) {
            self.build_with(u64::MAX)
        }
    }

    #[test]
    fn test_bind_on_empty_caches() {
        let h = Harness::new();
        h.source.serve(URL, png(64, 64));
        let (loader, mut dispatcher) = h.build();
        let target = TargetId::new(1);

        loader.bind_natural(URL, target);
        assert!(dispatcher.dispatch_next().unwrap());

        assert_eq!(h.source.opens(), 1);
        assert_eq!(h.store.edits(), 1);
        assert_eq!(h.store.commits(), 1);
        assert_eq!(h.store.read_hits(), 1);
        assert_eq!(h.codec.decodes(), 1);

        let shown = &dispatcher.surface().0;
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].0, target);
        assert_eq!(loader.wanted(target).as_deref(), Some(URL));
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[test]
    fn test_memory_hit_in_bind_goes_through_dispatcher() {
        let h = Harness::new();
        h.source.serve(URL, png(16, 16));
        let (loader, mut dispatcher) = h.build();

        loader.bind_natural(URL, TargetId::new(1));
        assert!(dispatcher.dispatch_next().unwrap());

        loader.bind_natural(URL, TargetId::new(2));
        assert_eq!(dispatcher.pump().unwrap(), 1);

        let shown = &dispatcher.surface().0;
        assert_eq!(shown.len(), 2);
        assert!(Arc::ptr_eq(&shown[0].1, &shown[1].1));
        assert_eq!(h.source.opens(), 1);
        assert_eq!(h.codec.decodes(), 1);
    }

    #[tokio::test]
    async fn test_second_load_comes_from_memory() {
        let h = Harness::new();
        h.source.serve(URL, png(32, 32));
        let (loader, _dispatcher) = h.build();

        let first = loader.load(URL, Dimensions::NATURAL).await.unwrap().unwrap();
        let second = loader.load(URL, Dimensions::NATURAL).await.unwrap().unwrap();

        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert!(Arc::ptr_eq(&first.image, &second.image));
        assert_eq!(h.source.opens(), 1);
        assert_eq!(h.store.read_misses(), 1);
        assert_eq!(h.store.read_hits(), 1);
        assert_eq!(loader.memory_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_no_entry() {
        let h = Harness::new();
        h.source.serve_truncated(URL, png(64, 64));
        let (loader, _dispatcher) = h.build();

        let loaded = loader.load(URL, Dimensions::NATURAL).await.unwrap();

        assert!(loaded.is_none());
        assert_eq!(h.store.aborts(), 1);
        assert_eq!(h.store.commits(), 0);
        assert_eq!(h.store.read_misses(), 2);
        assert_eq!(blob_files(&h.dir), vec!["VERSION".to_string()]);
        assert_eq!(loader.memory_stats().entries, 0);
    }

    #[test]
    fn test_rebound_target_never_shows_stale_image() {
        let h = Harness::new();
        h.source.serve(URL, png(8, 8));
        h.source.serve(OTHER_URL, png(4, 4));
        h.source.hold(URL);
        let (loader, mut dispatcher) = h.build();
        let target = TargetId::new(9);

        let bounds = Dimensions::new(8, 8);

        loader.bind(URL, target, bounds);
        loader.bind(OTHER_URL, target, bounds);

        assert!(dispatcher.dispatch_next().unwrap());
        h.source.release(URL);
        assert!(dispatcher.dispatch_next().unwrap());

        let shown = &dispatcher.surface().0;
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].1.width(), 4);
        assert_eq!(dispatcher.stats().delivered, 1);
        assert_eq!(dispatcher.stats().discarded, 1);

        // the superseded fetch still warmed the cache
        assert_eq!(loader.memory_stats().entries, 2);
    }

    #[test]
    fn test_load_blocking_refuses_coordination_thread() {
        let h = Harness::new();
        h.source.serve(URL, png(8, 8));
        let (loader, mut dispatcher) = h.build();
        dispatcher.pump().unwrap();

        assert!(matches!(
            loader.load_blocking(URL, Dimensions::NATURAL),
            Err(LoadError::WrongThread { operation: "load_blocking" })
        ));

        let loaded = std::thread::scope(|scope| {
            scope
                .spawn(|| loader.load_blocking(URL, Dimensions::NATURAL))
                .join()
                .unwrap()
        });
        assert!(loaded.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_blocking_refuses_async_context() {
        let h = Harness::new();
        let (loader, _dispatcher) = h.build();

        assert!(matches!(
            loader.load_blocking(URL, Dimensions::NATURAL),
            Err(LoadError::WrongThread { .. })
        ));
    }

    #[tokio::test]
    async fn test_low_space_runs_without_disk() {
        let h = Harness::new();
        h.source.serve(URL, png(16, 16));
        let (loader, _dispatcher) = h.build_with(1024);

        assert!(!loader.disk_enabled());
        let loaded = loader.load(URL, Dimensions::NATURAL).await.unwrap().unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(h.store.edits(), 0);
        assert_eq!(h.store.read_misses() + h.store.read_hits(), 0);
        assert_eq!(h.source.opens(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_falls_back_to_network() {
        let h = Harness::new();
        h.source.serve(URL, png(8, 8));
        let (loader, _dispatcher) = h.build();

        loader.close_store().await.unwrap();
        assert!(!loader.disk_enabled());

        let loaded = loader.load(URL, Dimensions::NATURAL).await.unwrap().unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(h.source.opens(), 1);
        assert_eq!(h.store.edits(), 0);
    }

    #[tokio::test]
    async fn test_busy_editor_fails_the_request() {
        let h = Harness::new();
        h.source.serve(URL, png(8, 8));
        let (loader, _dispatcher) = h.build();
        let held = h.store.edit(&loader.key_for(URL)).await.unwrap().unwrap();

        let loaded = loader.load(URL, Dimensions::NATURAL).await.unwrap();

        assert!(loaded.is_none());
        assert_eq!(h.source.opens(), 0);
        assert_eq!(h.store.busy(), 1);
        held.abort().await.unwrap();
    }

    #[test]
    fn test_prefetch_warms_memory() {
        let h = Harness::new();
        h.source.serve(URL, png(8, 8));
        let (loader, mut dispatcher) = h.build();

        loader.prefetch(URL, Dimensions::NATURAL);
        for _ in 0..500 {
            if loader.memory_stats().entries == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(loader.memory_stats().entries, 1);

        loader.bind_natural(URL, TargetId::new(1));
        assert_eq!(dispatcher.pump().unwrap(), 1);
        assert_eq!(h.source.opens(), 1);
    }

    #[test]
    fn test_shutdown_persists_entries() {
        let h = Harness::new();
        h.source.serve(URL, png(8, 8));
        let (loader, _dispatcher) = h.build();
        let key = loader.key_for(URL);

        assert!(loader.load_blocking(URL, Dimensions::NATURAL).unwrap().is_some());
        loader.shutdown().unwrap();

        let reopened = FileBlobStore::open(h.dir.path().join("bitmap"), 1, 1, 1024 * 1024).unwrap();
        assert!(reopened.contains(&key));
    }

    #[test]
    fn test_hash_code_keys() {
        let h = Harness::new();
        let mut config = h.config();
        config.key_scheme = KeyScheme::HashCode;
        let (loader, _dispatcher) = ImageLoader::builder(config)
            .byte_source(h.source.clone())
            .blob_store(h.store.clone())
            .space_probe(Arc::new({
                let mut probe = MockSpaceProbe::new();
                probe.expect_usable_space().returning(|_| Ok(u64::MAX));
                probe
            }))
            .build(Recorder::default())
            .unwrap();

        assert_eq!(loader.key_for("a").as_str(), "97");
    }
}

//! Disk cache adapter over a transactional blob store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{BlobEditor, BlobStore, ByteStream, SpaceProbe, StoreResult};
use crate::infrastructure::config::DiskConfig;

use super::blob_store::FileBlobStore;

/// Values per entry; image bytes live in slot 0.
const VALUE_COUNT: usize = 1;
const IMAGE_SLOT: usize = 0;

/// Reads and writes encoded image bytes, or does nothing when disabled.
///
/// Disabling happens at open, when free space is short or the store fails
/// to open, and on [`Self::close`]. It is never retried.
pub struct DiskCache {
    store: Option<Arc<dyn BlobStore>>,
    closed: AtomicBool,
    directory: PathBuf,
}

impl DiskCache {
    /// Opens the default [`FileBlobStore`] in the configured directory.
    #[must_use]
    pub fn open(config: &DiskConfig, probe: &dyn SpaceProbe) -> Self {
        Self::open_with(config, probe, |directory, config| {
            let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::open(
                directory,
                config.version,
                VALUE_COUNT,
                config.capacity_bytes,
            )?);
            Ok(store)
        })
    }

    /// Runs the directory and free-space checks, then opens the store with
    /// `open_store`.
    #[must_use]
    pub fn open_with<F>(config: &DiskConfig, probe: &dyn SpaceProbe, open_store: F) -> Self
    where
        F: FnOnce(&Path, &DiskConfig) -> StoreResult<Arc<dyn BlobStore>>,
    {
        let directory = config.effective_directory();

        if let Err(e) = std::fs::create_dir_all(&directory) {
            warn!(path = %directory.display(), error = %e, "Cannot create disk cache directory, disk cache disabled");
            return Self::disabled(directory);
        }

        match probe.usable_space(&directory) {
            Ok(available) if available > config.capacity_bytes => {}
            Ok(available) => {
                warn!(
                    path = %directory.display(),
                    available,
                    required = config.capacity_bytes,
                    "Not enough free space, disk cache disabled"
                );
                return Self::disabled(directory);
            }
            Err(e) => {
                warn!(path = %directory.display(), error = %e, "Cannot probe free space, disk cache disabled");
                return Self::disabled(directory);
            }
        }

        match open_store(&directory, config) {
            Ok(store) => {
                info!(path = %directory.display(), capacity = config.capacity_bytes, "Disk cache ready");
                Self::with_store(store, directory)
            }
            Err(e) => {
                warn!(path = %directory.display(), error = %e, "Failed to open disk cache, disk cache disabled");
                Self::disabled(directory)
            }
        }
    }

    /// Wraps an already opened store, skipping every check.
    #[must_use]
    pub fn with_store(store: Arc<dyn BlobStore>, directory: impl Into<PathBuf>) -> Self {
        Self {
            store: Some(store),
            closed: AtomicBool::new(false),
            directory: directory.into(),
        }
    }

    /// A cache that never stores anything.
    #[must_use]
    pub fn disabled(directory: impl Into<PathBuf>) -> Self {
        Self {
            store: None,
            closed: AtomicBool::new(false),
            directory: directory.into(),
        }
    }

    /// Returns true if a store is attached and not yet closed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.active().is_some()
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn active(&self) -> Option<&Arc<dyn BlobStore>> {
        self.store
            .as_ref()
            .filter(|_| !self.closed.load(Ordering::Acquire))
    }

    fn store(&self) -> LoadResult<&Arc<dyn BlobStore>> {
        self.active()
            .ok_or_else(|| LoadError::store_unavailable("disk cache disabled"))
    }

    /// Reads the bytes committed for `key`. Always absent when disabled.
    ///
    /// # Errors
    /// Returns [`LoadError::StoreUnavailable`] if the store fails.
    pub async fn read(&self, key: &CacheKey) -> LoadResult<Option<Bytes>> {
        let Some(store) = self.active() else {
            return Ok(None);
        };
        let bytes = store
            .read(key)
            .await?
            .and_then(|snapshot| snapshot.into_slot(IMAGE_SLOT));
        trace!(key = %key, hit = bytes.is_some(), "Disk cache lookup");
        Ok(bytes)
    }

    /// Opens a write transaction for `key`.
    ///
    /// # Errors
    /// Returns [`LoadError::StoreUnavailable`] when disabled or when another
    /// writer holds the key.
    pub async fn edit(&self, key: &CacheKey) -> LoadResult<Box<dyn BlobEditor>> {
        self.store()?
            .edit(key)
            .await?
            .ok_or_else(|| LoadError::store_unavailable(format!("editor busy for {key}")))
    }

    /// Streams `stream` into `editor`, committing on a complete transfer and
    /// aborting otherwise. The store is flushed either way. Returns the
    /// number of bytes written.
    ///
    /// # Errors
    /// Returns the transfer error, or [`LoadError::StoreUnavailable`] if the
    /// write or the commit fails.
    pub async fn commit_stream(
        &self,
        mut editor: Box<dyn BlobEditor>,
        stream: ByteStream,
    ) -> LoadResult<u64> {
        let outcome = match drain_into(editor.as_mut(), stream).await {
            Ok(written) => editor
                .commit()
                .await
                .map(|()| written)
                .map_err(LoadError::from),
            Err(e) => {
                if let Err(abort_err) = editor.abort().await {
                    warn!(error = %abort_err, "Failed to abort disk cache edit");
                }
                Err(e)
            }
        };
        self.flush_logged().await;
        outcome
    }

    /// Discards an open transaction and flushes the store.
    pub async fn abort(&self, editor: Box<dyn BlobEditor>) {
        if let Err(e) = editor.abort().await {
            warn!(error = %e, "Failed to abort disk cache edit");
        }
        self.flush_logged().await;
    }

    /// Writes `stream` as the value of `key` in one transaction.
    ///
    /// # Errors
    /// See [`Self::edit`] and [`Self::commit_stream`].
    pub async fn write(&self, key: &CacheKey, stream: ByteStream) -> LoadResult<u64> {
        let editor = self.edit(key).await?;
        self.commit_stream(editor, stream).await
    }

    /// Drops the committed entry for `key`. Returns false when disabled, when
    /// there is no entry, or while another writer holds the key.
    ///
    /// # Errors
    /// Returns [`LoadError::StoreUnavailable`] if the store fails.
    pub async fn remove(&self, key: &CacheKey) -> LoadResult<bool> {
        let Some(store) = self.active() else {
            return Ok(false);
        };
        Ok(store.remove(key).await?)
    }

    /// Flushes the store. No-op when disabled.
    ///
    /// # Errors
    /// Returns [`LoadError::StoreUnavailable`] if the store fails.
    pub async fn flush(&self) -> LoadResult<()> {
        if let Some(store) = self.active() {
            store.flush().await?;
        }
        Ok(())
    }

    async fn flush_logged(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Failed to flush disk cache");
        }
    }

    /// Flushes and closes the store, disabling the cache from then on.
    /// No-op when already disabled.
    ///
    /// # Errors
    /// Returns [`LoadError::StoreUnavailable`] if the store fails to close.
    pub async fn close(&self) -> LoadResult<()> {
        if let Some(store) = self.active()
            && !self.closed.swap(true, Ordering::AcqRel)
        {
            store.close().await?;
            debug!(path = %self.directory.display(), "Disk cache closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("directory", &self.directory)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

async fn drain_into(editor: &mut dyn BlobEditor, mut stream: ByteStream) -> LoadResult<u64> {
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        editor.write_slot(IMAGE_SLOT, &chunk).await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

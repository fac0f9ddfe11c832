//! Directory-backed transactional blob store.
//!
//! Layout: a `VERSION` marker plus one `<key>.<slot>` file per value. Edits
//! are staged in temporary files inside the directory and published by
//! atomic rename on commit. The LRU index lives in memory and is rebuilt
//! from file modification times on open.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::StoreError;
use crate::domain::ports::{BlobEditor, BlobStore, Snapshot, StoreResult};

const VERSION_FILE: &str = "VERSION";
const MAGIC: &str = "pixfetch.blobstore";
const STAGING_PREFIX: &str = ".staging-";

struct Index {
    entries: LruCache<CacheKey, u64>,
    size: u64,
}

impl Index {
    fn remove(&mut self, key: &CacheKey) {
        if let Some(size) = self.entries.pop(key) {
            self.size -= size;
        }
    }

    /// Pops least-recently-used entries until the total fits `max_size`.
    fn take_victims(&mut self, max_size: u64) -> Vec<CacheKey> {
        let mut victims = Vec::new();
        while self.size > max_size {
            let Some((key, size)) = self.entries.pop_lru() else {
                break;
            };
            self.size -= size;
            victims.push(key);
        }
        victims
    }
}

struct StoreInner {
    directory: PathBuf,
    value_count: usize,
    max_size: u64,
    index: Mutex<Index>,
    editing: Mutex<HashSet<CacheKey>>,
    closed: AtomicBool,
}

impl StoreInner {
    fn blob_path(&self, key: &CacheKey, index: usize) -> PathBuf {
        self.directory.join(format!("{key}.{index}"))
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn remove_entry_files(&self, key: &CacheKey) {
        for index in 0..self.value_count {
            let path = self.blob_path(key, index);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove blob");
            }
        }
    }

    async fn trim_to_size(&self) {
        let victims = self.index.lock().take_victims(self.max_size);
        for key in victims {
            debug!(key = %key, "Evicting blob store entry");
            self.remove_entry_files(&key).await;
        }
    }
}

/// Transactional key-to-blob store over a single directory.
pub struct FileBlobStore {
    inner: Arc<StoreInner>,
}

impl FileBlobStore {
    /// Opens (or creates) a store in `directory`.
    ///
    /// Entries written with a different `version` or `value_count` are
    /// discarded. Staging files left behind by a crashed process are removed.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the directory cannot be created or read.
    pub fn open(
        directory: impl Into<PathBuf>,
        version: u32,
        value_count: usize,
        max_size: u64,
    ) -> StoreResult<Self> {
        let directory = directory.into();
        let value_count = value_count.max(1);
        std::fs::create_dir_all(&directory)?;

        let marker = format!("{MAGIC}\n{version}\n{value_count}\n");
        let marker_path = directory.join(VERSION_FILE);
        match std::fs::read_to_string(&marker_path) {
            Ok(existing) if existing == marker => {}
            Ok(_) => {
                info!(path = %directory.display(), version, "Blob store version changed, discarding entries");
                wipe(&directory)?;
                std::fs::write(&marker_path, &marker)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                wipe(&directory)?;
                std::fs::write(&marker_path, &marker)?;
            }
            Err(e) => return Err(e.into()),
        }

        let index = rebuild_index(&directory, value_count)?;
        let inner = StoreInner {
            directory,
            value_count,
            max_size,
            index: Mutex::new(index),
            editing: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        };

        let victims = inner.index.lock().take_victims(max_size);
        for key in victims {
            debug!(key = %key, "Evicting blob store entry");
            for slot in 0..value_count {
                let path = inner.blob_path(&key, slot);
                if let Err(e) = std::fs::remove_file(&path)
                    && e.kind() != io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), error = %e, "Failed to remove blob");
                }
            }
        }

        debug!(
            path = %inner.directory.display(),
            entries = inner.index.lock().entries.len(),
            size = inner.index.lock().size,
            "Opened blob store"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Returns the byte budget.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    /// Returns the total size of committed entries in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.index.lock().size
    }

    /// Returns the number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.index.lock().entries.len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks for a committed entry without promoting it.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.index.lock().entries.contains(key)
    }
}

impl std::fmt::Debug for FileBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlobStore")
            .field("directory", &self.inner.directory)
            .field("max_size", &self.inner.max_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn read(&self, key: &CacheKey) -> StoreResult<Option<Snapshot>> {
        self.inner.ensure_open()?;
        if self.inner.index.lock().entries.get(key).is_none() {
            trace!(key = %key, "Blob store miss");
            return Ok(None);
        }

        let mut slots = Vec::with_capacity(self.inner.value_count);
        for index in 0..self.inner.value_count {
            match tokio::fs::read(self.inner.blob_path(key, index)).await {
                Ok(bytes) => slots.push(Bytes::from(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // evicted or removed underneath us
                    self.inner.index.lock().remove(key);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        trace!(key = %key, "Blob store hit");
        Ok(Some(Snapshot::new(key.clone(), slots)))
    }

    async fn edit(&self, key: &CacheKey) -> StoreResult<Option<Box<dyn BlobEditor>>> {
        self.inner.ensure_open()?;
        if !self.inner.editing.lock().insert(key.clone()) {
            debug!(key = %key, "Blob store editor already open");
            return Ok(None);
        }
        let slots = (0..self.inner.value_count).map(|_| None).collect();
        Ok(Some(Box::new(FileBlobEditor {
            store: Arc::clone(&self.inner),
            key: key.clone(),
            slots,
        })))
    }

    async fn remove(&self, key: &CacheKey) -> StoreResult<bool> {
        self.inner.ensure_open()?;
        if self.inner.editing.lock().contains(key) {
            debug!(key = %key, "Blob store entry is being edited, not removing");
            return Ok(false);
        }
        let present = {
            let mut index = self.inner.index.lock();
            let present = index.entries.contains(key);
            index.remove(key);
            present
        };
        if present {
            self.inner.remove_entry_files(key).await;
            debug!(key = %key, "Removed blob store entry");
        }
        Ok(present)
    }

    async fn flush(&self) -> StoreResult<()> {
        self.inner.ensure_open()?;
        self.inner.trim_to_size().await;

        #[cfg(unix)]
        tokio::fs::File::open(&self.inner.directory)
            .await?
            .sync_all()
            .await?;

        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.flush().await?;
        self.inner.closed.store(true, Ordering::Release);
        info!(path = %self.inner.directory.display(), "Closed blob store");
        Ok(())
    }
}

struct StagedSlot {
    temp: NamedTempFile,
    file: tokio::fs::File,
    written: u64,
}

/// Editor staging every slot in a temporary file.
///
/// Dropping the editor without committing discards staged data and releases
/// the key.
struct FileBlobEditor {
    store: Arc<StoreInner>,
    key: CacheKey,
    slots: Vec<Option<StagedSlot>>,
}

#[async_trait]
impl BlobEditor for FileBlobEditor {
    async fn write_slot(&mut self, index: usize, chunk: &[u8]) -> StoreResult<()> {
        self.store.ensure_open()?;
        let value_count = self.store.value_count;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(StoreError::SlotOutOfRange { index, value_count })?;

        if slot.is_none() {
            let temp = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(&self.store.directory)?;
            let file = tokio::fs::File::from_std(temp.as_file().try_clone()?);
            *slot = Some(StagedSlot {
                temp,
                file,
                written: 0,
            });
        }

        if let Some(staged) = slot.as_mut() {
            staged.file.write_all(chunk).await?;
            staged.written += chunk.len() as u64;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.store.ensure_open()?;
        let existing = self.store.index.lock().entries.peek(&self.key).is_some();
        if !existing && let Some(index) = self.slots.iter().position(Option::is_none) {
            return Err(StoreError::MissingSlot { index });
        }

        let mut size = 0u64;
        for (index, slot) in std::mem::take(&mut self.slots).into_iter().enumerate() {
            let path = self.store.blob_path(&self.key, index);
            match slot {
                Some(StagedSlot {
                    temp,
                    mut file,
                    written,
                }) => {
                    file.flush().await?;
                    file.sync_all().await?;
                    drop(file);
                    temp.persist(&path).map_err(io::Error::from)?;
                    size += written;
                }
                None => {
                    size += tokio::fs::metadata(&path).await.map_or(0, |m| m.len());
                }
            }
        }

        {
            let mut index = self.store.index.lock();
            index.remove(&self.key);
            index.entries.push(self.key.clone(), size);
            index.size += size;
        }
        debug!(key = %self.key, size, "Committed blob store entry");

        self.store.trim_to_size().await;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        debug!(key = %self.key, "Aborted blob store edit");
        Ok(())
    }
}

impl Drop for FileBlobEditor {
    fn drop(&mut self) {
        // staged temp files delete themselves
        self.store.editing.lock().remove(&self.key);
    }
}

fn is_staging(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Splits `<key>.<slot>` into its parts.
fn parse_blob_name(name: &str) -> Option<(&str, usize)> {
    let (stem, slot) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some((stem, slot.parse().ok()?))
}

/// Removes every blob and staging file, leaving foreign files alone.
fn wipe(directory: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_staging(name) || parse_blob_name(name).is_some() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn rebuild_index(directory: &Path, value_count: usize) -> io::Result<Index> {
    struct Found {
        sizes: Vec<Option<u64>>,
        modified: SystemTime,
    }

    let mut found: HashMap<String, Found> = HashMap::new();
    let mut strays = Vec::new();

    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_staging(name) {
            strays.push(entry.path());
            continue;
        }
        let Some((stem, slot)) = parse_blob_name(name) else {
            continue;
        };
        if slot >= value_count {
            strays.push(entry.path());
            continue;
        }

        let meta = entry.metadata()?;
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let record = found.entry(stem.to_string()).or_insert_with(|| Found {
            sizes: vec![None; value_count],
            modified,
        });
        record.sizes[slot] = Some(meta.len());
        record.modified = record.modified.max(modified);
    }

    for path in strays {
        debug!(path = %path.display(), "Removing stray blob store file");
        std::fs::remove_file(&path)?;
    }

    let mut complete = Vec::new();
    for (stem, record) in found {
        if record.sizes.iter().all(Option::is_some) {
            let size = record.sizes.iter().flatten().sum();
            complete.push((stem, record.modified, size));
        } else {
            for (slot, present) in record.sizes.iter().enumerate() {
                if present.is_some() {
                    std::fs::remove_file(directory.join(format!("{stem}.{slot}")))?;
                }
            }
        }
    }
    complete.sort_by_key(|(_, modified, _)| *modified);

    let mut index = Index {
        entries: LruCache::unbounded(),
        size: 0,
    };
    for (stem, _, size) in complete {
        index.entries.push(CacheKey::from_raw(stem), size);
        index.size += size;
    }
    Ok(index)
}

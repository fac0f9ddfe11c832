//! Fixtures shared by the image pipeline tests.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;

use crate::domain::ports::mocks::CountingStore;

use super::blob_store::FileBlobStore;
use super::disk_cache::DiskCache;

/// Encodes a solid `width x height` PNG.
pub fn png(width: u32, height: u32) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255])))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// A file store wrapped in counters, living in `dir/bitmap`.
pub fn counting_store(dir: &TempDir) -> Arc<CountingStore> {
    let store = FileBlobStore::open(dir.path().join("bitmap"), 1, 1, 1024 * 1024).unwrap();
    Arc::new(CountingStore::new(Arc::new(store)))
}

/// Disk cache over `store`.
pub fn disk_over(dir: &TempDir, store: &Arc<CountingStore>) -> Arc<DiskCache> {
    Arc::new(DiskCache::with_store(store.clone(), dir.path().join("bitmap")))
}

/// Names of the files in `dir/bitmap`, sorted.
pub fn blob_files(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("bitmap"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

//! Raster decoding backed by the `image` crate.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits};

use crate::domain::entities::Dimensions;
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::ImageCodec;

/// Default cap on the decoder's allocation for one image.
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

/// Decodes PNG, JPEG and WebP, downscaling after decode when the sample
/// factor is above one.
///
/// Full-resolution decoding is bounded by an allocation cap, so an image
/// whose pixel buffer would exceed it fails with a decode error.
#[derive(Debug, Clone, Copy)]
pub struct RasterCodec {
    filter: FilterType,
    max_decode_bytes: u64,
}

impl RasterCodec {
    /// Creates a codec using `filter` for downscaling.
    #[must_use]
    pub const fn with_filter(filter: FilterType) -> Self {
        Self {
            filter,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    /// Caps the decoder's allocation at `bytes`.
    #[must_use]
    pub const fn max_decode_bytes(mut self, bytes: u64) -> Self {
        self.max_decode_bytes = bytes;
        self
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_decode_bytes);
        limits
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::with_filter(FilterType::Triangle)
    }
}

impl ImageCodec for RasterCodec {
    fn probe_dimensions(&self, bytes: &[u8]) -> LoadResult<Dimensions> {
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoadError::decode(format!("failed to sniff format: {e}")))?
            .into_dimensions()
            .map_err(|e| LoadError::decode(format!("failed to read dimensions: {e}")))?;
        Ok(Dimensions::new(width, height))
    }

    fn decode(&self, bytes: &[u8], sample_factor: u32) -> LoadResult<DynamicImage> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoadError::decode(format!("failed to sniff format: {e}")))?;
        reader.limits(self.limits());
        let image = reader
            .decode()
            .map_err(|e| LoadError::decode(format!("failed to decode image: {e}")))?;

        if sample_factor <= 1 {
            return Ok(image);
        }

        let width = (image.width() / sample_factor).max(1);
        let height = (image.height() / sample_factor).max(1);
        Ok(image.resize_exact(width, height, self.filter))
    }
}

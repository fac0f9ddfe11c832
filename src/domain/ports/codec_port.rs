//! Port definition for image decoding.

use image::DynamicImage;

use crate::domain::entities::Dimensions;
use crate::domain::errors::LoadResult;

/// Port for decoding compressed image bytes.
///
/// Both calls are CPU-bound and run on the blocking pool.
pub trait ImageCodec: Send + Sync {
    /// Reads the image dimensions without decoding pixels.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::Decode`] for unknown or
    /// corrupt data.
    fn probe_dimensions(&self, bytes: &[u8]) -> LoadResult<Dimensions>;

    /// Decodes the image, downscaled by `sample_factor` on both axes.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::Decode`] for corrupt or
    /// truncated data.
    fn decode(&self, bytes: &[u8], sample_factor: u32) -> LoadResult<DynamicImage>;
}

//! Domain entity definitions.

mod cache_key;
mod image;

pub use cache_key::{CacheKey, DIGEST_KEY_BYTES, KeyScheme};
pub use image::{Dimensions, ImageSource, LoadOutcome, LoadedImage, TargetId};

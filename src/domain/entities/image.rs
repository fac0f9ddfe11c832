//! Domain types for image requests and results.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::errors::{LoadError, LoadResult};

use super::CacheKey;

/// Width and height in pixels.
///
/// Used both for decoded sources and for requested bounds, where
/// [`Dimensions::NATURAL`] means "unconstrained".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Zero request. No bound is given, so the sampler keeps halving down to
    /// the coarsest power-of-two factor rather than keeping the natural size.
    pub const NATURAL: Self = Self::new(0, 0);

    /// Creates dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Validates signed dimensions coming from toolkit coordinates.
    ///
    /// # Errors
    /// Returns [`LoadError::InvalidArgument`] for negative values or values
    /// that do not fit in `u32`.
    pub fn try_from_signed(width: i64, height: i64) -> LoadResult<Self> {
        let convert = |value: i64, axis: &str| {
            u32::try_from(value)
                .map_err(|_| LoadError::invalid_argument(format!("{axis} out of range: {value}")))
        };
        Ok(Self::new(convert(width, "width")?, convert(height, "height")?))
    }

    /// Returns true for the unconstrained request.
    #[must_use]
    pub const fn is_natural(self) -> bool {
        self.width == 0 && self.height == 0
    }
}

impl TryFrom<(i32, i32)> for Dimensions {
    type Error = LoadError;

    fn try_from((width, height): (i32, i32)) -> LoadResult<Self> {
        Self::try_from_signed(i64::from(width), i64::from(height))
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identity of a display target (widget, cell, tile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl TargetId {
    /// Creates a target id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU cache.
    MemoryCache,
    /// Decoded from the disk cache.
    DiskCache,
    /// Fetched from the network by this request.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded image together with its key and provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key of the resource.
    pub key: CacheKey,
    /// The decoded image, shared with the memory cache.
    pub image: Arc<DynamicImage>,
    /// Tier the image came from.
    pub source: ImageSource,
}

/// Completion of a bind request, consumed once by the dispatcher.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Target the request was issued for.
    pub target: TargetId,
    /// Resource identifier the request was issued for.
    pub url: String,
    /// The decoded image, or `None` if every tier failed.
    pub image: Option<LoadedImage>,
}

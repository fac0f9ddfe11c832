//! Image loading error types.

use thiserror::Error;

use super::StoreError;

/// Result type for loading operations.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Errors raised along the cache-and-fetch pipeline.
///
/// [`LoadError::InvalidArgument`] and [`LoadError::WrongThread`] are fatal to
/// the calling operation. The other variants are absorbed by the fetch
/// coordinator and surface to callers as an absent image.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("disk cache unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("{operation} called from a thread that must not block")]
    WrongThread { operation: &'static str },
}

impl LoadError {
    /// Creates invalid argument error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates store unavailable error.
    #[must_use]
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates wrong thread error.
    #[must_use]
    pub const fn wrong_thread(operation: &'static str) -> Self {
        Self::WrongThread { operation }
    }

    /// Returns true if the error must reach the caller instead of being
    /// turned into an absent image.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::WrongThread { .. })
    }
}

impl From<StoreError> for LoadError {
    fn from(err: StoreError) -> Self {
        Self::store_unavailable(err.to_string())
    }
}

//! Domain layer with core entities, pure services and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Pure services.
pub mod services;

pub use entities::{CacheKey, Dimensions, ImageSource, KeyScheme, LoadOutcome, LoadedImage, TargetId};
pub use errors::{LoadError, LoadResult, StoreError};
pub use ports::{BlobEditor, BlobStore, ByteSource, ByteStream, DisplaySurface, ImageCodec, SpaceProbe};
pub use services::SamplingMode;

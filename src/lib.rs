//! pixfetch - A two-tier image cache and fetch pipeline.
//!
//! Given a resource url, returns a decoded image from the memory cache, the
//! disk cache or the network, in that order. Results are delivered to a
//! display surface on one coordination thread, and a target that was rebound
//! in the meantime never receives a stale image.
//!
//! ```no_run
//! use pixfetch::domain::entities::TargetId;
//! use pixfetch::infrastructure::{ConfigStorage, ImageLoader, init_logging};
//! use pixfetch::presentation::SlotBoard;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigStorage::new()?.load_config(None)?;
//! init_logging(&config)?;
//!
//! let (loader, mut dispatcher) = ImageLoader::builder(config).build(SlotBoard::new())?;
//! loader.bind_natural("https://example.com/cat.png", TargetId::new(1));
//! dispatcher.dispatch_next()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, services and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;
/// Presentation layer containing display-side state.
pub mod presentation;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "pixfetch";

//! Port definition for storage space probing.

use std::path::Path;

/// Reports usable free space for a storage path.
#[cfg_attr(test, mockall::automock)]
pub trait SpaceProbe: Send + Sync {
    /// Returns the bytes available to this process under `path`.
    ///
    /// # Errors
    /// Returns an I/O error if the path's filesystem cannot be determined.
    fn usable_space(&self, path: &Path) -> std::io::Result<u64>;
}

//! Identity of the coordination thread.

use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use crate::domain::errors::{LoadError, LoadResult};

/// The thread that pumps the result dispatcher.
///
/// Claimed once, by the first caller of [`Self::claim`]. Blocking work
/// refuses to run on it.
#[derive(Debug, Clone, Default)]
pub struct CoordinationThread(Arc<OnceLock<ThreadId>>);

impl CoordinationThread {
    /// Creates an unclaimed handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the current thread, or checks that it already owns the claim.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] if another thread holds the claim.
    pub fn claim(&self, operation: &'static str) -> LoadResult<()> {
        let current = thread::current().id();
        if *self.0.get_or_init(|| current) == current {
            Ok(())
        } else {
            Err(LoadError::wrong_thread(operation))
        }
    }

    /// Returns true if the current thread holds the claim.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.0.get() == Some(&thread::current().id())
    }

    /// Fails when called on the coordination thread.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] on the coordination thread.
    pub fn ensure_off(&self, operation: &'static str) -> LoadResult<()> {
        if self.is_current() {
            return Err(LoadError::wrong_thread(operation));
        }
        Ok(())
    }

    /// Returns the owning thread, if claimed.
    #[must_use]
    pub fn owner(&self) -> Option<ThreadId> {
        self.0.get().copied()
    }
}

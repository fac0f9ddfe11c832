//! Delivery of completed loads to the display surface.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::domain::entities::LoadOutcome;
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::DisplaySurface;

use super::coordination::CoordinationThread;
use super::tags::TagRegistry;

/// Counters of handled outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Images shown on their target.
    pub delivered: u64,
    /// Images dropped because the target was rebound.
    pub discarded: u64,
    /// Outcomes without an image.
    pub failed: u64,
}

/// Single consumer of load outcomes, bound to the coordination thread.
///
/// Owns the display surface, so the surface never has to cross threads.
pub struct ResultDispatcher<S> {
    outcomes: mpsc::UnboundedReceiver<LoadOutcome>,
    tags: TagRegistry,
    surface: S,
    coordination: CoordinationThread,
    stats: DispatchStats,
}

impl<S: DisplaySurface> ResultDispatcher<S> {
    pub(crate) fn new(
        outcomes: mpsc::UnboundedReceiver<LoadOutcome>,
        tags: TagRegistry,
        surface: S,
        coordination: CoordinationThread,
    ) -> Self {
        Self {
            outcomes,
            tags,
            surface,
            coordination,
            stats: DispatchStats::default(),
        }
    }

    /// Applies every outcome already queued, without blocking. Returns how
    /// many were handled.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] off the coordination thread.
    pub fn pump(&mut self) -> LoadResult<usize> {
        self.coordination.claim("pump")?;
        let mut handled = 0;
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.apply(outcome);
            handled += 1;
        }
        Ok(handled)
    }

    /// Blocks until one outcome arrives and applies it. Returns `false` once
    /// every sender is gone.
    ///
    /// # Errors
    /// Returns [`LoadError::WrongThread`] off the coordination thread or
    /// inside an async runtime.
    pub fn dispatch_next(&mut self) -> LoadResult<bool> {
        self.coordination.claim("dispatch_next")?;
        if Handle::try_current().is_ok() {
            return Err(LoadError::wrong_thread("dispatch_next"));
        }
        match self.outcomes.blocking_recv() {
            Some(outcome) => {
                self.apply(outcome);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies outcomes until every sender is gone. Returns how many were
    /// handled.
    ///
    /// # Errors
    /// See [`Self::dispatch_next`].
    pub fn run_blocking(&mut self) -> LoadResult<usize> {
        let mut handled = 0;
        while self.dispatch_next()? {
            handled += 1;
        }
        debug!(handled, "Outcome channel closed");
        Ok(handled)
    }

    fn apply(&mut self, outcome: LoadOutcome) {
        let LoadOutcome { target, url, image } = outcome;
        let Some(loaded) = image else {
            self.stats.failed += 1;
            debug!(target = %target, url = %url, "No image for target");
            return;
        };

        let surface = &mut self.surface;
        let delivered = self.tags.deliver_if_current(target, &url, || {
            surface.set_image(target, Arc::clone(&loaded.image));
        });

        if delivered.is_some() {
            self.stats.delivered += 1;
            trace!(target = %target, url = %url, source = %loaded.source, "Image delivered");
        } else {
            self.stats.discarded += 1;
            warn!(target = %target, url = %url, "Discarding stale image, target was rebound");
        }
    }
}

impl<S> ResultDispatcher<S> {
    /// Returns the delivery counters.
    #[must_use]
    pub const fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Returns the display surface.
    #[must_use]
    pub const fn surface(&self) -> &S {
        &self.surface
    }

    /// Returns the display surface mutably.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Consumes the dispatcher, returning the display surface.
    pub fn into_surface(self) -> S {
        self.surface
    }
}

impl<S> std::fmt::Debug for ResultDispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

//! Display-side state of image targets.

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::TargetId;
use crate::domain::ports::DisplaySurface;

/// Loading state of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotStatus {
    /// Nothing requested yet.
    #[default]
    NotStarted,
    /// A load is in flight.
    Loading,
    /// An image is shown.
    Ready,
}

/// One display target: the url it was last asked to show and the image it
/// currently shows.
#[derive(Clone, Default)]
pub struct ImageSlot {
    /// Last requested url.
    pub url: Option<String>,
    /// Image on screen.
    pub image: Option<Arc<DynamicImage>>,
    /// Loading state.
    pub status: SlotStatus,
}

impl ImageSlot {
    /// Marks the slot as loading `url`. The previous image stays visible.
    pub fn set_loading(&mut self, url: &str) {
        self.url = Some(url.to_string());
        self.status = SlotStatus::Loading;
    }

    /// Shows `image`.
    pub fn set_loaded(&mut self, image: Arc<DynamicImage>) {
        self.image = Some(image);
        self.status = SlotStatus::Ready;
    }

    /// Returns true once an image is shown.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.image.is_some() && matches!(self.status, SlotStatus::Ready)
    }

    /// Returns true while a load is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, SlotStatus::Loading)
    }
}

impl std::fmt::Debug for ImageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSlot")
            .field("url", &self.url)
            .field("has_image", &self.image.is_some())
            .field("status", &self.status)
            .finish()
    }
}

/// Display surface keeping one [`ImageSlot`] per target.
#[derive(Debug, Default)]
pub struct SlotBoard {
    slots: HashMap<TargetId, ImageSlot>,
}

impl SlotBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `target` as loading `url`.
    pub fn mark_loading(&mut self, target: TargetId, url: &str) {
        self.slots.entry(target).or_default().set_loading(url);
    }

    /// Returns the slot of `target`.
    #[must_use]
    pub fn slot(&self, target: TargetId) -> Option<&ImageSlot> {
        self.slots.get(&target)
    }

    /// Removes the slot of `target`.
    pub fn remove(&mut self, target: TargetId) -> Option<ImageSlot> {
        self.slots.remove(&target)
    }

    /// Number of slots showing an image.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_ready()).count()
    }

    /// Number of known slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl DisplaySurface for SlotBoard {
    fn set_image(&mut self, target: TargetId, image: Arc<DynamicImage>) {
        self.slots.entry(target).or_default().set_loaded(image);
    }
}

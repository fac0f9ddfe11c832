//! Presentation layer: display-side state fed by the result dispatcher.

/// Image slots and the slot board surface.
pub mod image_slot;

pub use image_slot::{ImageSlot, SlotBoard, SlotStatus};

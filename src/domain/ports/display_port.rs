//! Port definition for the display surface.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::TargetId;

/// Surface that shows decoded images on display targets.
///
/// Only ever called on the coordination thread, so implementations need not
/// be `Send`.
pub trait DisplaySurface {
    /// Shows `image` on `target`.
    fn set_image(&mut self, target: TargetId, image: Arc<DynamicImage>);
}

impl<F> DisplaySurface for F
where
    F: FnMut(TargetId, Arc<DynamicImage>),
{
    fn set_image(&mut self, target: TargetId, image: Arc<DynamicImage>) {
        self(target, image);
    }
}

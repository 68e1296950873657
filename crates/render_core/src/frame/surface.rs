//! Presentation surfaces

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{Extent2D, ImageFormat};

/// Something frames are presented to: a window, or nothing at all
pub trait RenderSurface: Send {
    /// Current drawable size; zero while minimised
    fn extent(&self) -> Extent2D;

    /// Presentation format
    fn format(&self) -> ImageFormat {
        ImageFormat::Bgra8Srgb
    }
}

/// Window-less surface whose size is set by the application.
///
/// Clones share the same size, so a copy kept outside the render context
/// can drive resizes.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    extent: Arc<Mutex<Extent2D>>,
    format: ImageFormat,
}

impl HeadlessSurface {
    /// Create a surface of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: Arc::new(Mutex::new(Extent2D::new(width, height))),
            format: ImageFormat::Bgra8Srgb,
        }
    }

    /// Use a different presentation format
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Change the size, as a window resize would
    pub fn resize(&self, width: u32, height: u32) {
        log::debug!("Headless surface resized to {width}x{height}");
        *self.extent.lock() = Extent2D::new(width, height);
    }
}

impl RenderSurface for HeadlessSurface {
    fn extent(&self) -> Extent2D {
        *self.extent.lock()
    }

    fn format(&self) -> ImageFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_observe_resizes() {
        let surface = HeadlessSurface::new(640, 480);
        let window = surface.clone();
        window.resize(800, 600);
        assert_eq!(surface.extent(), Extent2D::new(800, 600));
        assert_eq!(surface.format(), ImageFormat::Bgra8Srgb);
    }
}

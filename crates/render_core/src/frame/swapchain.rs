//! Swapchain management
//!
//! The swapchain and the views over its images are registered with the
//! render target deletion queue, views last, so a flush frees the views
//! before the swapchain that owns their images.

use std::sync::Arc;

use crate::deletion_queue::DeletionQueue;
use crate::device::{
    Extent2D, GraphicsDevice, ImageFormat, ImageHandle, ImageViewHandle, ImageViewInfo,
    RawHandle, ResourceKind, SwapchainDesc, SwapchainHandle,
};
use crate::error::GfxResult;
use crate::handle::{DeviceObject, ResourceHandle};
use crate::resources::ImageView;

/// Swapchain object
pub struct SwapchainObject;

impl DeviceObject for SwapchainObject {
    type Desc = SwapchainDesc;
    type Raw = SwapchainHandle;

    const KIND: ResourceKind = ResourceKind::Swapchain;
    const NULL: SwapchainHandle = SwapchainHandle::NULL;

    fn create(device: &dyn GraphicsDevice, desc: &SwapchainDesc) -> GfxResult<SwapchainHandle> {
        device.create_swapchain(desc, SwapchainHandle::NULL)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: SwapchainHandle) {
        device.destroy_swapchain(raw);
    }
}

/// Swapchain wrapper with one view per image
pub struct Swapchain {
    views: Vec<ImageView>,
    images: Vec<ImageHandle>,
    handle: ResourceHandle<SwapchainObject>,
}

impl Swapchain {
    /// Create a swapchain and its image views, registering their teardown
    /// with `queue`
    pub fn new(
        device: &Arc<dyn GraphicsDevice>,
        queue: &Arc<DeletionQueue>,
        desc: SwapchainDesc,
    ) -> GfxResult<Self> {
        log::debug!(
            "Creating swapchain {}x{} with {} images",
            desc.extent.width,
            desc.extent.height,
            desc.image_count
        );
        let handle = ResourceHandle::create_deferred(device, desc, "swapchain", queue)?;
        let images = device.swapchain_images(handle.expect_live())?;
        let views = images
            .iter()
            .enumerate()
            .map(|(i, &image)| {
                ResourceHandle::create_deferred(
                    device,
                    ImageViewInfo {
                        image,
                        format: desc.format,
                    },
                    format!("swapchain.view{i}"),
                    queue,
                )
            })
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            views,
            images,
            handle,
        })
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> SwapchainHandle {
        self.handle.expect_live()
    }

    /// Image size
    pub fn extent(&self) -> Extent2D {
        self.handle.desc().extent
    }

    /// Image format
    pub fn format(&self) -> ImageFormat {
        self.handle.desc().format
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image at `index`
    pub fn image(&self, index: u32) -> ImageHandle {
        self.images[index as usize]
    }

    /// View over the image at `index`
    pub fn view(&self, index: u32) -> ImageViewHandle {
        self.views[index as usize].expect_live()
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle.get())
            .field("extent", &self.extent())
            .field("images", &self.images.len())
            .finish()
    }
}

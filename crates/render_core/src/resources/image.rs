//! Images and image views

use std::sync::Arc;

use crate::deletion_queue::DeletionQueue;
use crate::device::{
    Allocation, AllocationHandle, Extent2D, GraphicsDevice, ImageAllocInfo, ImageFormat,
    ImageHandle, ImageUsage, ImageViewHandle, ImageViewInfo, RawHandle, ResourceKind,
};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};

/// Image creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Size in texels
    pub extent: Extent2D,
    /// Texel format
    pub format: ImageFormat,
    /// Usage flags
    pub usage: ImageUsage,
    /// Mip level count
    pub mip_levels: u32,
}

impl ImageDesc {
    /// Single-mip image
    pub const fn new(extent: Extent2D, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
        }
    }

    /// Sampled texture that is filled through transfers
    pub fn texture(extent: Extent2D, format: ImageFormat) -> Self {
        Self::new(extent, format, ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST)
    }

    /// Depth attachment
    pub const fn depth(extent: Extent2D) -> Self {
        Self::new(extent, ImageFormat::Depth32Float, ImageUsage::DEPTH_ATTACHMENT)
    }
}

/// Device image plus its allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedImage {
    /// Image handle
    pub image: ImageHandle,
    /// Backing allocation
    pub allocation: Allocation,
}

/// Image object for [`ResourceHandle`]
pub struct ImageObject;

impl DeviceObject for ImageObject {
    type Desc = ImageDesc;
    type Raw = AllocatedImage;

    const KIND: ResourceKind = ResourceKind::Image;
    const NULL: AllocatedImage = AllocatedImage {
        image: ImageHandle::NULL,
        allocation: Allocation {
            handle: AllocationHandle::NULL,
            size: 0,
            host_visible: false,
        },
    };

    fn create(device: &dyn GraphicsDevice, desc: &ImageDesc) -> GfxResult<AllocatedImage> {
        if desc.extent.is_empty() {
            return Err(GfxError::InvalidParameters(format!(
                "image extent {}x{} is empty",
                desc.extent.width, desc.extent.height
            )));
        }
        let (image, allocation) = device.create_image(&ImageAllocInfo {
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
            mip_levels: desc.mip_levels,
        })?;
        Ok(AllocatedImage { image, allocation })
    }

    fn destroy(device: &dyn GraphicsDevice, raw: AllocatedImage) {
        device.destroy_image(raw.image, raw.allocation.handle);
    }
}

/// Image view object
pub struct ImageViewObject;

impl DeviceObject for ImageViewObject {
    type Desc = ImageViewInfo;
    type Raw = ImageViewHandle;

    const KIND: ResourceKind = ResourceKind::ImageView;
    const NULL: ImageViewHandle = ImageViewHandle::NULL;

    fn create(device: &dyn GraphicsDevice, desc: &ImageViewInfo) -> GfxResult<ImageViewHandle> {
        device.create_image_view(desc)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: ImageViewHandle) {
        device.destroy_image_view(raw);
    }
}

/// View over an image
pub type ImageView = ResourceHandle<ImageViewObject>;

/// Image wrapper with memory management.
///
/// Like [`Buffer`](super::Buffer), teardown is handed to a deletion queue at
/// construction. Views created through [`Image::create_view`] go into the
/// same queue after the image, so a flush frees them first.
pub struct Image {
    handle: ResourceHandle<ImageObject>,
    queue: Arc<DeletionQueue>,
}

impl Image {
    /// Create an image and register its teardown with `queue`
    pub fn new(
        device: &Arc<dyn GraphicsDevice>,
        queue: &Arc<DeletionQueue>,
        desc: ImageDesc,
        label: &str,
    ) -> GfxResult<Self> {
        Ok(Self {
            handle: ResourceHandle::create_deferred(device, desc, label, queue)?,
            queue: Arc::clone(queue),
        })
    }

    /// Create a view over the whole image
    pub fn create_view(&self) -> GfxResult<ImageView> {
        let info = ImageViewInfo {
            image: self.handle(),
            format: self.format(),
        };
        ResourceHandle::create_deferred(
            self.handle.device(),
            info,
            format!("{}.view", self.handle.label()),
            &self.queue,
        )
    }

    /// Get the image handle
    pub fn handle(&self) -> ImageHandle {
        self.handle.expect_live().image
    }

    /// Image handle, or null once released
    pub fn get(&self) -> ImageHandle {
        self.handle.get().image
    }

    /// Size in texels
    pub fn extent(&self) -> Extent2D {
        self.handle.desc().extent
    }

    /// Texel format
    pub fn format(&self) -> ImageFormat {
        self.handle.desc().format
    }

    /// Creation parameters
    pub fn desc(&self) -> &ImageDesc {
        self.handle.desc()
    }

    /// Whether the image can still be used
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Let go of the image. The deletion queue frees it on its next flush.
    pub fn release(&mut self) {
        self.handle.release();
    }

    /// Hand the image to `queue`. Views over it must be retired to the same
    /// queue afterwards so they are freed first.
    pub fn retire(&mut self, queue: &DeletionQueue) {
        self.handle.retire(queue);
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.get())
            .field("desc", self.desc())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    #[test]
    fn test_views_are_freed_before_their_image() {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        let queue = Arc::new(DeletionQueue::new("images"));

        let image = Image::new(
            &device,
            &queue,
            ImageDesc::texture(Extent2D::new(8, 8), ImageFormat::Rgba8Unorm),
            "albedo",
        )
        .unwrap();
        let view = image.create_view().unwrap();
        assert_eq!(
            queue.pending_kinds(),
            vec![ResourceKind::Image, ResourceKind::ImageView]
        );

        drop(view);
        drop(image);
        software.clear_events();
        queue.flush();

        let kinds: Vec<_> = software
            .events()
            .into_iter()
            .filter_map(|e| match e {
                crate::device::DeviceEvent::Destroyed { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ResourceKind::ImageView, ResourceKind::Image]);
    }

    #[test]
    fn test_empty_extent_is_invalid() {
        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new());
        let queue = Arc::new(DeletionQueue::new("images"));
        let err = Image::new(&device, &queue, ImageDesc::depth(Extent2D::new(0, 4)), "d")
            .unwrap_err();
        assert!(matches!(err, GfxError::InvalidParameters(_)));
    }
}

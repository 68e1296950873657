//! API-agnostic creation parameters shared by the device collaborator
//! and the wrappers built on top of it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::handles::{
    AllocationHandle, BufferHandle, CommandBufferHandle, DescriptorSetHandle, ImageHandle,
    ImageViewHandle, SemaphoreHandle,
};

/// Two dimensional size in texels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

impl Extent2D {
    /// Create a new extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero (minimised window, bad request)
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Texel count
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

bitflags! {
    /// How a buffer will be used by the device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Source of transfer commands
        const TRANSFER_SRC = 1 << 0;
        /// Destination of transfer commands
        const TRANSFER_DST = 1 << 1;
        /// Uniform buffer binding
        const UNIFORM = 1 << 2;
        /// Storage buffer binding
        const STORAGE = 1 << 3;
        /// Vertex input
        const VERTEX = 1 << 4;
        /// Index input
        const INDEX = 1 << 5;
        /// Indirect draw arguments
        const INDIRECT = 1 << 6;
    }
}

bitflags! {
    /// How an image will be used by the device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Source of transfer commands
        const TRANSFER_SRC = 1 << 0;
        /// Destination of transfer commands
        const TRANSFER_DST = 1 << 1;
        /// Sampled from shaders
        const SAMPLED = 1 << 2;
        /// Storage image access
        const STORAGE = 1 << 3;
        /// Color render target
        const COLOR_ATTACHMENT = 1 << 4;
        /// Depth render target
        const DEPTH_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    /// Shader stages a descriptor is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
        /// Compute stage
        const COMPUTE = 1 << 2;
        /// Vertex and fragment
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Where an allocation lives and how the host may reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryLocation {
    /// Device local, not host visible
    GpuOnly,
    /// Host visible, written by the CPU and read by the GPU
    CpuToGpu,
    /// Host visible, written by the GPU and read back by the CPU
    GpuToCpu,
}

impl MemoryLocation {
    /// Whether the host can map this memory
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// Texel formats understood by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// 8-bit BGRA, sRGB (typical presentation format)
    Bgra8Srgb,
    /// 32-bit float single channel
    R32Float,
    /// 32-bit float depth
    Depth32Float,
}

impl ImageFormat {
    /// Size of one texel in bytes
    pub const fn bytes_per_texel(self) -> u64 {
        4
    }

    /// Whether the format carries depth
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

/// Layout an image is in when a descriptor reads it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined
    Undefined,
    /// Any access
    General,
    /// Read from shaders
    ShaderReadOnly,
    /// Color attachment writes
    ColorAttachment,
    /// Transfer destination
    TransferDst,
    /// Transfer source
    TransferSrc,
    /// Ready to present
    PresentSrc,
}

/// Descriptor binding types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DescriptorType {
    /// Uniform buffer
    UniformBuffer,
    /// Uniform buffer with dynamic offset
    UniformBufferDynamic,
    /// Storage buffer
    StorageBuffer,
    /// Image plus sampler
    CombinedImageSampler,
    /// Sampled image without sampler
    SampledImage,
    /// Storage image
    StorageImage,
}

impl DescriptorType {
    /// Whether bindings of this type reference a buffer
    pub const fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::UniformBuffer | Self::UniformBufferDynamic | Self::StorageBuffer
        )
    }
}

/// One binding slot of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorBinding {
    /// Binding slot
    pub binding: u32,
    /// Resource type
    pub ty: DescriptorType,
    /// Visible stages
    pub stages: ShaderStages,
    /// Array element count
    pub count: u32,
}

impl DescriptorBinding {
    /// Single-element binding
    pub const fn new(binding: u32, ty: DescriptorType, stages: ShaderStages) -> Self {
        Self {
            binding,
            ty,
            stages,
            count: 1,
        }
    }
}

/// Capacity of one descriptor type inside a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    /// Descriptor type
    pub ty: DescriptorType,
    /// Number of descriptors of that type
    pub count: u32,
}

/// Resource referenced by a descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// Buffer range
    Buffer {
        /// Buffer
        buffer: BufferHandle,
        /// Byte offset
        offset: u64,
        /// Byte range
        range: u64,
    },
    /// Image view in a layout
    Image {
        /// View
        view: ImageViewHandle,
        /// Layout at access time
        layout: ImageLayout,
    },
}

/// Single descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Target set
    pub set: DescriptorSetHandle,
    /// Binding slot
    pub binding: u32,
    /// Descriptor type
    pub ty: DescriptorType,
    /// Referenced resource
    pub resource: DescriptorResource,
}

/// Parameters the allocator needs to create a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocInfo {
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: BufferUsage,
    /// Memory location
    pub location: MemoryLocation,
}

/// Parameters the allocator needs to create an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAllocInfo {
    /// Size in texels
    pub extent: Extent2D,
    /// Texel format
    pub format: ImageFormat,
    /// Usage flags
    pub usage: ImageUsage,
    /// Mip level count
    pub mip_levels: u32,
}

/// Allocation metadata returned together with a buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Allocator handle
    pub handle: AllocationHandle,
    /// Allocated size in bytes
    pub size: u64,
    /// Whether the memory can be mapped
    pub host_visible: bool,
}

/// Parameters of an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageViewInfo {
    /// Viewed image
    pub image: ImageHandle,
    /// View format
    pub format: ImageFormat,
}

/// Region of a buffer-to-buffer copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    /// Offset in the source
    pub src_offset: u64,
    /// Offset in the destination
    pub dst_offset: u64,
    /// Bytes to copy
    pub size: u64,
}

impl BufferCopy {
    /// Copy `size` bytes from the start of one buffer to the start of another
    pub const fn whole(size: u64) -> Self {
        Self {
            src_offset: 0,
            dst_offset: 0,
            size,
        }
    }
}

/// Region of a buffer-to-image copy (always the whole first mip)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    /// Offset in the source buffer
    pub buffer_offset: u64,
    /// Copied extent
    pub extent: Extent2D,
}

/// Execution queue categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueType {
    /// Graphics and presentation
    Graphics,
    /// Async compute
    Compute,
    /// Dedicated transfer
    Transfer,
}

/// One queue submission
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    /// Command buffers executed in order
    pub command_buffers: &'a [CommandBufferHandle],
    /// Semaphores waited before execution
    pub wait_semaphores: &'a [SemaphoreHandle],
    /// Semaphores signalled after execution
    pub signal_semaphores: &'a [SemaphoreHandle],
}

/// Parameters of a swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Image size
    pub extent: Extent2D,
    /// Requested image count
    pub image_count: u32,
    /// Presentation format
    pub format: ImageFormat,
}

/// Result of acquiring a presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image is ready for rendering
    Acquired {
        /// Index into the swapchain images
        image_index: u32,
        /// Presentation still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface and must be recreated
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    /// Presented normally
    Presented,
    /// Presented, but the swapchain should be recreated
    Suboptimal,
    /// Not presented, the swapchain must be recreated
    OutOfDate,
}

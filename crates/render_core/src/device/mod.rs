//! Graphics device collaborator
//!
//! The core never owns device state. Every create, destroy, map, submit and
//! present goes through [`GraphicsDevice`], which a backend (Vulkan, D3D12,
//! Metal, or the bundled [`SoftwareDevice`]) implements. Wrappers hold the
//! device as `Arc<dyn GraphicsDevice>` so deletion closures can capture it.

pub mod handles;
pub mod software;
pub mod types;

use std::ptr::NonNull;

pub use handles::{
    AllocationHandle, BufferHandle, CommandBufferHandle, CommandPoolHandle,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle,
    ImageHandle, ImageViewHandle, RawHandle, ResourceKind, SemaphoreHandle, ShaderModuleHandle,
    SwapchainHandle,
};
pub use software::{DeviceEvent, SoftwareDevice, SoftwareDeviceConfig};
pub use types::{
    AcquireResult, Allocation, BufferAllocInfo, BufferCopy, BufferImageCopy, BufferUsage,
    DescriptorBinding, DescriptorPoolSize, DescriptorResource, DescriptorType, DescriptorWrite,
    Extent2D, ImageAllocInfo, ImageFormat, ImageLayout, ImageUsage, ImageViewInfo,
    MemoryLocation, PresentResult, QueueType, ShaderStages, SubmitInfo, SwapchainDesc,
};

use crate::error::GfxResult;

/// Logical device, memory allocator and queues.
///
/// Destroy calls are infallible: a backend treats destroying an unknown or
/// already destroyed handle as a contract violation and panics.
pub trait GraphicsDevice: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Queue family index serving the given queue type, if any
    fn queue_family_index(&self, queue: QueueType) -> Option<u32>;

    // === Memory ===

    /// Create a buffer and its backing allocation
    fn create_buffer(&self, info: &BufferAllocInfo) -> GfxResult<(BufferHandle, Allocation)>;

    /// Free a buffer and its allocation. The allocation must not be mapped.
    fn destroy_buffer(&self, buffer: BufferHandle, allocation: AllocationHandle);

    /// Map host-visible memory, returning the base address
    fn map_memory(&self, allocation: AllocationHandle) -> GfxResult<NonNull<u8>>;

    /// Undo [`GraphicsDevice::map_memory`]
    fn unmap_memory(&self, allocation: AllocationHandle);

    /// Create an image and its backing allocation
    fn create_image(&self, info: &ImageAllocInfo) -> GfxResult<(ImageHandle, Allocation)>;

    /// Free an image and its allocation
    fn destroy_image(&self, image: ImageHandle, allocation: AllocationHandle);

    /// Create a view over an image
    fn create_image_view(&self, info: &ImageViewInfo) -> GfxResult<ImageViewHandle>;

    /// Destroy an image view
    fn destroy_image_view(&self, view: ImageViewHandle);

    // === Descriptors ===

    /// Create a descriptor set layout from bindings sorted by slot
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> GfxResult<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> GfxResult<DescriptorPoolHandle>;

    /// Return every set of a pool to it
    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Destroy a descriptor pool and every set drawn from it
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocate one set; fails with `OutOfPoolMemory` when the pool is full
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> GfxResult<DescriptorSetHandle>;

    /// Point descriptors at resources
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // === Commands ===

    /// Create a command pool for a queue family
    fn create_command_pool(&self, queue_family: u32) -> GfxResult<CommandPoolHandle>;

    /// Destroy a command pool and its command buffers
    fn destroy_command_pool(&self, pool: CommandPoolHandle);

    /// Return every command buffer of a pool to the initial state
    fn reset_command_pool(&self, pool: CommandPoolHandle);

    /// Allocate a primary command buffer
    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> GfxResult<CommandBufferHandle>;

    /// Free a command buffer back to its pool
    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle);

    /// Start recording
    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GfxResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GfxResult<()>;

    /// Discard recorded commands
    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> GfxResult<()>;

    /// Record a buffer to buffer copy
    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    );

    /// Record a fill of a buffer range with a repeated 32-bit value
    fn cmd_fill_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        dst: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    );

    /// Record a buffer to image copy
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    );

    /// Record a clear of a color image
    fn cmd_clear_color_image(
        &self,
        command_buffer: CommandBufferHandle,
        image: ImageHandle,
        color: [f32; 4],
    );

    // === Synchronisation ===

    /// Create a fence
    fn create_fence(&self, signaled: bool) -> GfxResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: FenceHandle);

    /// Block until the fence is signalled or the timeout expires
    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> GfxResult<()>;

    /// Return a fence to the unsignalled state
    fn reset_fence(&self, fence: FenceHandle) -> GfxResult<()>;

    /// Non-blocking fence query
    fn fence_signaled(&self, fence: FenceHandle) -> GfxResult<bool>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> GfxResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Submit work; `fence` may be null
    fn queue_submit(&self, queue: QueueType, submit: &SubmitInfo<'_>, fence: FenceHandle)
        -> GfxResult<()>;

    /// Block until every queue is idle
    fn wait_idle(&self) -> GfxResult<()>;

    // === Presentation ===

    /// Create a swapchain, optionally replacing `old`
    fn create_swapchain(&self, desc: &SwapchainDesc, old: SwapchainHandle)
        -> GfxResult<SwapchainHandle>;

    /// Destroy a swapchain and the images it owns
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Images owned by a swapchain
    fn swapchain_images(&self, swapchain: SwapchainHandle) -> GfxResult<Vec<ImageHandle>>;

    /// Acquire the next presentable image, signalling `signal` when ready
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout_ns: u64,
    ) -> GfxResult<AcquireResult>;

    /// Present an image after the wait semaphores signal
    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait_semaphores: &[SemaphoreHandle],
    ) -> GfxResult<PresentResult>;

    // === Shaders ===

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> GfxResult<ShaderModuleHandle>;

    /// Destroy a shader module
    fn destroy_shader_module(&self, module: ShaderModuleHandle);
}

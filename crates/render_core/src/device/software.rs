//! CPU-emulated graphics device
//!
//! Implements [`GraphicsDevice`] entirely in host memory so the lifecycle
//! core can run headless and be tested without a GPU:
//!
//! - every buffer and image is backed by real bytes, so copies, fills and
//!   clears are observable;
//! - queue submissions are deferred and only execute when their fence is
//!   waited (or on `wait_idle`), which mirrors work being in flight;
//! - a memory budget turns oversized requests into `OutOfDeviceMemory`;
//! - descriptor pools enforce their set and per-type capacities;
//! - destroying an unknown handle, freeing mapped memory or destroying an
//!   image that still has views panics, the same way validation layers
//!   would flag it;
//! - every create/destroy/map/unmap is appended to an event log.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use super::handles::{
    AllocationHandle, BufferHandle, CommandBufferHandle, CommandPoolHandle,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle,
    ImageHandle, ImageViewHandle, RawHandle, ResourceKind, SemaphoreHandle, ShaderModuleHandle,
    SwapchainHandle,
};
use super::types::{
    AcquireResult, Allocation, BufferAllocInfo, BufferCopy, BufferImageCopy, DescriptorBinding,
    DescriptorPoolSize, DescriptorResource, DescriptorType, DescriptorWrite, Extent2D,
    ImageAllocInfo, ImageFormat, ImageViewInfo, PresentResult, QueueType, SubmitInfo,
    SwapchainDesc,
};
use super::GraphicsDevice;
use crate::error::{GfxError, GfxResult};

new_key_type! {
    struct MemoryKey;
    struct BufferKey;
    struct ImageKey;
    struct ViewKey;
    struct LayoutKey;
    struct PoolKey;
    struct SetKey;
    struct CommandPoolKey;
    struct CommandBufferKey;
    struct FenceKey;
    struct SemaphoreKey;
    struct SwapchainKey;
    struct ShaderKey;
}

fn key_of<K: Key>(raw: u64) -> K {
    K::from(KeyData::from_ffi(raw))
}

fn raw_of<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

/// Configuration of the software device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftwareDeviceConfig {
    /// Name reported in logs
    pub name: String,
    /// Total bytes of buffer and image memory available
    pub memory_budget: u64,
    /// Expose a dedicated transfer queue family (index 1)
    pub dedicated_transfer_queue: bool,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        Self {
            name: "software".to_string(),
            memory_budget: 256 * 1024 * 1024,
            dedicated_transfer_queue: true,
        }
    }
}

/// Observable device activity, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// An object was created
    Created {
        /// Object kind
        kind: ResourceKind,
        /// Raw handle
        raw: u64,
    },
    /// An object was destroyed
    Destroyed {
        /// Object kind
        kind: ResourceKind,
        /// Raw handle
        raw: u64,
    },
    /// An allocation was mapped
    Mapped {
        /// Raw allocation handle
        allocation: u64,
    },
    /// An allocation was unmapped
    Unmapped {
        /// Raw allocation handle
        allocation: u64,
    },
    /// A descriptor pool was reset
    PoolReset {
        /// Raw pool handle
        pool: u64,
    },
    /// Work was submitted to a queue
    Submitted {
        /// Target queue
        queue: QueueType,
        /// Number of command buffers
        command_buffers: usize,
    },
    /// Deferred work executed
    Executed {
        /// Number of commands run
        commands: usize,
    },
    /// An image was presented
    Presented {
        /// Swapchain image index
        image_index: u32,
    },
    /// The device was waited idle
    WaitIdle,
}

/// Host bytes standing in for device memory.
///
/// The block never moves once allocated, so a mapped pointer stays valid
/// until the block is dropped.
struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
    host_visible: bool,
    map_count: u32,
    budgeted: bool,
}

// The block is only touched while the device state lock is held or through
// a mapping whose lifetime the owning buffer controls.
unsafe impl Send for HostMemory {}

impl HostMemory {
    fn zeroed(len: usize, host_visible: bool, budgeted: bool) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self {
            ptr,
            len,
            host_visible,
            map_count: 0,
            budgeted,
        }
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

struct BufferRecord {
    memory: MemoryKey,
    size: u64,
}

struct ImageRecord {
    memory: MemoryKey,
    extent: Extent2D,
    format: ImageFormat,
    swapchain: Option<SwapchainKey>,
}

struct PoolRecord {
    max_sets: u32,
    capacity: HashMap<DescriptorType, u32>,
    used: HashMap<DescriptorType, u32>,
    sets: Vec<SetKey>,
}

struct SetRecord {
    pool: PoolKey,
    bindings: Vec<DescriptorBinding>,
    writes: HashMap<u32, DescriptorResource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug, Clone)]
enum Command {
    CopyBuffer {
        src: BufferKey,
        dst: BufferKey,
        regions: Vec<BufferCopy>,
    },
    FillBuffer {
        dst: BufferKey,
        offset: u64,
        size: u64,
        value: u32,
    },
    CopyBufferToImage {
        src: BufferKey,
        dst: ImageKey,
        region: BufferImageCopy,
    },
    ClearColorImage {
        image: ImageKey,
        color: [f32; 4],
    },
}

struct CommandBufferRecord {
    pool: CommandPoolKey,
    state: RecordState,
    commands: Vec<Command>,
}

struct SwapchainRecord {
    images: Vec<ImageKey>,
    next_image: u32,
    out_of_date: bool,
}

struct PendingSubmission {
    command_buffers: Vec<CommandBufferKey>,
    commands: Vec<Command>,
    fence: Option<FenceKey>,
}

#[derive(Default)]
struct State {
    memory: SlotMap<MemoryKey, HostMemory>,
    buffers: SlotMap<BufferKey, BufferRecord>,
    images: SlotMap<ImageKey, ImageRecord>,
    views: SlotMap<ViewKey, ImageKey>,
    layouts: SlotMap<LayoutKey, Vec<DescriptorBinding>>,
    pools: SlotMap<PoolKey, PoolRecord>,
    sets: SlotMap<SetKey, SetRecord>,
    command_pools: SlotMap<CommandPoolKey, Vec<CommandBufferKey>>,
    command_buffers: SlotMap<CommandBufferKey, CommandBufferRecord>,
    fences: SlotMap<FenceKey, bool>,
    semaphores: SlotMap<SemaphoreKey, ()>,
    swapchains: SlotMap<SwapchainKey, SwapchainRecord>,
    shaders: SlotMap<ShaderKey, usize>,
    pending: VecDeque<PendingSubmission>,
    reject_next_submit: bool,
    memory_used: u64,
    created: HashMap<ResourceKind, usize>,
    destroyed: HashMap<ResourceKind, usize>,
    events: Vec<DeviceEvent>,
}

impl State {
    fn record_created(&mut self, kind: ResourceKind, raw: u64) {
        *self.created.entry(kind).or_insert(0) += 1;
        self.events.push(DeviceEvent::Created { kind, raw });
    }

    fn record_destroyed(&mut self, kind: ResourceKind, raw: u64) {
        *self.destroyed.entry(kind).or_insert(0) += 1;
        self.events.push(DeviceEvent::Destroyed { kind, raw });
    }

    fn allocate_memory(
        &mut self,
        size: u64,
        host_visible: bool,
        budget: u64,
    ) -> GfxResult<MemoryKey> {
        let available = budget.saturating_sub(self.memory_used);
        if size > available {
            return Err(GfxError::OutOfDeviceMemory {
                requested: size,
                available,
            });
        }
        let len = usize::try_from(size).map_err(|_| GfxError::OutOfDeviceMemory {
            requested: size,
            available,
        })?;
        self.memory_used += size;
        Ok(self.memory.insert(HostMemory::zeroed(len, host_visible, true)))
    }

    fn free_memory(&mut self, key: MemoryKey) {
        let block = self
            .memory
            .remove(key)
            .unwrap_or_else(|| panic!("allocation {:#x} freed twice", raw_of(key)));
        assert_eq!(
            block.map_count, 0,
            "allocation {:#x} freed while still mapped",
            raw_of(key)
        );
        if block.budgeted {
            self.memory_used -= block.len as u64;
        }
    }

    fn buffer_key(&self, handle: BufferHandle) -> BufferKey {
        let key = key_of(handle.as_raw());
        assert!(
            self.buffers.contains_key(key),
            "use of unknown or destroyed {handle:?}"
        );
        key
    }

    fn image_key(&self, handle: ImageHandle) -> ImageKey {
        let key = key_of(handle.as_raw());
        assert!(
            self.images.contains_key(key),
            "use of unknown or destroyed {handle:?}"
        );
        key
    }

    fn recording(&mut self, handle: CommandBufferHandle) -> &mut CommandBufferRecord {
        let record = self
            .command_buffers
            .get_mut(key_of(handle.as_raw()))
            .unwrap_or_else(|| panic!("use of unknown or freed {handle:?}"));
        assert_eq!(
            record.state,
            RecordState::Recording,
            "{handle:?} is not recording"
        );
        record
    }

    fn remove_image_views_check(&self, image: ImageKey) {
        let dependents = self.views.values().filter(|v| **v == image).count();
        assert!(
            dependents == 0,
            "image {:#x} destroyed while {dependents} view(s) still reference it",
            raw_of(image)
        );
    }

    fn drain_until(&mut self, fence: Option<FenceKey>) {
        while let Some(submission) = self.pending.pop_front() {
            let reached = fence.is_some() && submission.fence == fence;
            self.execute(submission);
            if reached {
                break;
            }
        }
    }

    fn execute(&mut self, submission: PendingSubmission) {
        let count = submission.commands.len();
        for command in &submission.commands {
            self.run_command(command);
        }
        for key in submission.command_buffers {
            if let Some(record) = self.command_buffers.get_mut(key) {
                record.state = RecordState::Executable;
            }
        }
        if let Some(fence) = submission.fence {
            if let Some(signaled) = self.fences.get_mut(fence) {
                *signaled = true;
            }
        }
        self.events.push(DeviceEvent::Executed { commands: count });
    }

    fn memory_of_buffer(&self, key: BufferKey) -> Option<MemoryKey> {
        self.buffers.get(key).map(|b| b.memory)
    }

    fn run_command(&mut self, command: &Command) {
        match command {
            Command::CopyBuffer { src, dst, regions } => {
                let (Some(src_mem), Some(dst_mem)) =
                    (self.memory_of_buffer(*src), self.memory_of_buffer(*dst))
                else {
                    panic!("buffer destroyed while a copy referencing it was in flight");
                };
                for region in regions {
                    let staged = self.memory[src_mem].bytes()
                        [region.src_offset as usize..(region.src_offset + region.size) as usize]
                        .to_vec();
                    self.memory[dst_mem].bytes_mut()
                        [region.dst_offset as usize..(region.dst_offset + region.size) as usize]
                        .copy_from_slice(&staged);
                }
            }
            Command::FillBuffer {
                dst,
                offset,
                size,
                value,
            } => {
                let Some(mem) = self.memory_of_buffer(*dst) else {
                    panic!("buffer destroyed while a fill referencing it was in flight");
                };
                let range = &mut self.memory[mem].bytes_mut()
                    [*offset as usize..(*offset + *size) as usize];
                for chunk in range.chunks_mut(4) {
                    let len = chunk.len();
                    chunk.copy_from_slice(&value.to_le_bytes()[..len]);
                }
            }
            Command::CopyBufferToImage { src, dst, region } => {
                let Some(src_mem) = self.memory_of_buffer(*src) else {
                    panic!("buffer destroyed while an upload referencing it was in flight");
                };
                let image = &self.images[*dst];
                let dst_mem = image.memory;
                let len = (region.extent.area() * image.format.bytes_per_texel()) as usize;
                let start = region.buffer_offset as usize;
                let staged = self.memory[src_mem].bytes()[start..start + len].to_vec();
                self.memory[dst_mem].bytes_mut()[..len].copy_from_slice(&staged);
            }
            Command::ClearColorImage { image, color } => {
                let record = &self.images[*image];
                let texel = clear_texel(record.format, *color);
                let mem = record.memory;
                for chunk in self.memory[mem].bytes_mut().chunks_exact_mut(4) {
                    chunk.copy_from_slice(&texel);
                }
            }
        }
    }
}

fn clear_texel(format: ImageFormat, color: [f32; 4]) -> [u8; 4] {
    let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        ImageFormat::Rgba8Unorm => [unorm(color[0]), unorm(color[1]), unorm(color[2]), unorm(color[3])],
        ImageFormat::Bgra8Srgb => [unorm(color[2]), unorm(color[1]), unorm(color[0]), unorm(color[3])],
        ImageFormat::R32Float | ImageFormat::Depth32Float => color[0].to_le_bytes(),
    }
}

/// Host-memory implementation of [`GraphicsDevice`]
pub struct SoftwareDevice {
    config: SoftwareDeviceConfig,
    state: Mutex<State>,
}

impl SoftwareDevice {
    /// Create a device with the default configuration
    pub fn new() -> Self {
        Self::with_config(SoftwareDeviceConfig::default())
    }

    /// Create a device with an explicit configuration
    pub fn with_config(config: SoftwareDeviceConfig) -> Self {
        log::debug!(
            "Creating software device '{}' with {} bytes of memory",
            config.name,
            config.memory_budget
        );
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Every event recorded so far
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    /// Forget recorded events (counters are kept)
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Raw handles of destroyed objects of one kind, in destruction order
    pub fn destruction_order(&self, kind: ResourceKind) -> Vec<u64> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Destroyed { kind: k, raw } if *k == kind => Some(*raw),
                _ => None,
            })
            .collect()
    }

    /// Number of objects of a kind ever created
    pub fn created_count(&self, kind: ResourceKind) -> usize {
        self.state.lock().created.get(&kind).copied().unwrap_or(0)
    }

    /// Number of objects of a kind ever destroyed
    pub fn destroyed_count(&self, kind: ResourceKind) -> usize {
        self.state.lock().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Objects of a kind currently alive
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.created_count(kind) - self.destroyed_count(kind)
    }

    /// Bytes of budgeted memory currently allocated
    pub fn memory_in_use(&self) -> u64 {
        self.state.lock().memory_used
    }

    /// Submissions waiting for a fence wait or `wait_idle`
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Snapshot of a buffer's contents as the device sees them
    pub fn read_buffer(&self, buffer: BufferHandle) -> Vec<u8> {
        let state = self.state.lock();
        let key = state.buffer_key(buffer);
        let record = &state.buffers[key];
        state.memory[record.memory].bytes()[..record.size as usize].to_vec()
    }

    /// Snapshot of an image's first mip
    pub fn read_image(&self, image: ImageHandle) -> Vec<u8> {
        let state = self.state.lock();
        let key = state.image_key(image);
        state.memory[state.images[key].memory].bytes().to_vec()
    }

    /// Resource currently written to a descriptor binding
    pub fn descriptor_resource(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
    ) -> Option<DescriptorResource> {
        let state = self.state.lock();
        state
            .sets
            .get(key_of(set.as_raw()))
            .and_then(|record| record.writes.get(&binding).copied())
    }

    /// Fail the next queue submission with `OutOfDeviceMemory`, as a driver
    /// does when it cannot allocate submission resources
    pub fn reject_next_submit(&self) {
        self.state.lock().reject_next_submit = true;
    }

    /// Mark every swapchain out of date, as a driver does after a surface change
    pub fn invalidate_swapchains(&self) {
        let mut state = self.state.lock();
        for swapchain in state.swapchains.values_mut() {
            swapchain.out_of_date = true;
        }
        log::debug!("Software device invalidated all swapchains");
    }

    fn queue_family_count(&self) -> u32 {
        if self.config.dedicated_transfer_queue {
            2
        } else {
            1
        }
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn queue_family_index(&self, queue: QueueType) -> Option<u32> {
        match queue {
            QueueType::Graphics | QueueType::Compute => Some(0),
            QueueType::Transfer if self.config.dedicated_transfer_queue => Some(1),
            QueueType::Transfer => Some(0),
        }
    }

    fn create_buffer(&self, info: &BufferAllocInfo) -> GfxResult<(BufferHandle, Allocation)> {
        if info.size == 0 {
            return Err(GfxError::InvalidParameters(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let host_visible = info.location.is_host_visible();
        let memory = state.allocate_memory(info.size, host_visible, self.config.memory_budget)?;
        let key = state.buffers.insert(BufferRecord {
            memory,
            size: info.size,
        });
        let raw = raw_of(key);
        state.record_created(ResourceKind::Buffer, raw);
        Ok((
            BufferHandle::from_raw(raw),
            Allocation {
                handle: AllocationHandle::from_raw(raw_of(memory)),
                size: info.size,
                host_visible,
            },
        ))
    }

    fn destroy_buffer(&self, buffer: BufferHandle, allocation: AllocationHandle) {
        let mut state = self.state.lock();
        let record = state
            .buffers
            .remove(key_of(buffer.as_raw()))
            .unwrap_or_else(|| panic!("{buffer:?} destroyed twice or never created"));
        assert_eq!(
            raw_of(record.memory),
            allocation.as_raw(),
            "{buffer:?} destroyed with a foreign allocation"
        );
        state.free_memory(record.memory);
        state.record_destroyed(ResourceKind::Buffer, buffer.as_raw());
    }

    fn map_memory(&self, allocation: AllocationHandle) -> GfxResult<NonNull<u8>> {
        let mut state = self.state.lock();
        let block = state
            .memory
            .get_mut(key_of(allocation.as_raw()))
            .ok_or_else(|| GfxError::MapFailed(format!("unknown {allocation:?}")))?;
        if !block.host_visible {
            return Err(GfxError::MapFailed(format!(
                "{allocation:?} is not host visible"
            )));
        }
        block.map_count += 1;
        let ptr = block.ptr;
        state.events.push(DeviceEvent::Mapped {
            allocation: allocation.as_raw(),
        });
        Ok(ptr)
    }

    fn unmap_memory(&self, allocation: AllocationHandle) {
        let mut state = self.state.lock();
        let block = state
            .memory
            .get_mut(key_of(allocation.as_raw()))
            .unwrap_or_else(|| panic!("unmap of unknown {allocation:?}"));
        assert!(block.map_count > 0, "{allocation:?} unmapped while not mapped");
        block.map_count -= 1;
        state.events.push(DeviceEvent::Unmapped {
            allocation: allocation.as_raw(),
        });
    }

    fn create_image(&self, info: &ImageAllocInfo) -> GfxResult<(ImageHandle, Allocation)> {
        if info.extent.is_empty() || info.mip_levels == 0 {
            return Err(GfxError::InvalidParameters(format!(
                "image extent {}x{} with {} mip levels",
                info.extent.width, info.extent.height, info.mip_levels
            )));
        }
        let size = info.extent.area() * info.format.bytes_per_texel();
        let mut state = self.state.lock();
        let memory = state.allocate_memory(size, false, self.config.memory_budget)?;
        let key = state.images.insert(ImageRecord {
            memory,
            extent: info.extent,
            format: info.format,
            swapchain: None,
        });
        let raw = raw_of(key);
        state.record_created(ResourceKind::Image, raw);
        Ok((
            ImageHandle::from_raw(raw),
            Allocation {
                handle: AllocationHandle::from_raw(raw_of(memory)),
                size,
                host_visible: false,
            },
        ))
    }

    fn destroy_image(&self, image: ImageHandle, allocation: AllocationHandle) {
        let mut state = self.state.lock();
        let key: ImageKey = key_of(image.as_raw());
        let Some(record) = state.images.get(key) else {
            panic!("{image:?} destroyed twice or never created");
        };
        assert!(
            record.swapchain.is_none(),
            "{image:?} is owned by a swapchain"
        );
        assert_eq!(raw_of(record.memory), allocation.as_raw());
        state.remove_image_views_check(key);
        let memory = record.memory;
        state.images.remove(key);
        state.free_memory(memory);
        state.record_destroyed(ResourceKind::Image, image.as_raw());
    }

    fn create_image_view(&self, info: &ImageViewInfo) -> GfxResult<ImageViewHandle> {
        let mut state = self.state.lock();
        let image: ImageKey = key_of(info.image.as_raw());
        if !state.images.contains_key(image) {
            return Err(GfxError::UnknownHandle {
                kind: ResourceKind::Image,
                raw: info.image.as_raw(),
            });
        }
        let raw = raw_of(state.views.insert(image));
        state.record_created(ResourceKind::ImageView, raw);
        Ok(ImageViewHandle::from_raw(raw))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        let mut state = self.state.lock();
        state
            .views
            .remove(key_of(view.as_raw()))
            .unwrap_or_else(|| panic!("{view:?} destroyed twice or never created"));
        state.record_destroyed(ResourceKind::ImageView, view.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> GfxResult<DescriptorSetLayoutHandle> {
        let mut state = self.state.lock();
        let raw = raw_of(state.layouts.insert(bindings.to_vec()));
        state.record_created(ResourceKind::DescriptorSetLayout, raw);
        Ok(DescriptorSetLayoutHandle::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        let mut state = self.state.lock();
        state
            .layouts
            .remove(key_of(layout.as_raw()))
            .unwrap_or_else(|| panic!("{layout:?} destroyed twice or never created"));
        state.record_destroyed(ResourceKind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> GfxResult<DescriptorPoolHandle> {
        if max_sets == 0 {
            return Err(GfxError::InvalidParameters(
                "descriptor pool needs room for at least one set".to_string(),
            ));
        }
        let mut capacity = HashMap::new();
        for size in sizes {
            *capacity.entry(size.ty).or_insert(0) += size.count;
        }
        let mut state = self.state.lock();
        let raw = raw_of(state.pools.insert(PoolRecord {
            max_sets,
            capacity,
            used: HashMap::new(),
            sets: Vec::new(),
        }));
        state.record_created(ResourceKind::DescriptorPool, raw);
        Ok(DescriptorPoolHandle::from_raw(raw))
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        let record = state
            .pools
            .get_mut(key_of(pool.as_raw()))
            .unwrap_or_else(|| panic!("reset of unknown {pool:?}"));
        let sets = std::mem::take(&mut record.sets);
        record.used.clear();
        for set in sets {
            state.sets.remove(set);
        }
        state.events.push(DeviceEvent::PoolReset {
            pool: pool.as_raw(),
        });
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        let record = state
            .pools
            .remove(key_of(pool.as_raw()))
            .unwrap_or_else(|| panic!("{pool:?} destroyed twice or never created"));
        for set in record.sets {
            state.sets.remove(set);
        }
        state.record_destroyed(ResourceKind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> GfxResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        let bindings = state
            .layouts
            .get(key_of(layout.as_raw()))
            .cloned()
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::DescriptorSetLayout,
                raw: layout.as_raw(),
            })?;
        let pool_key: PoolKey = key_of(pool.as_raw());
        let record = state.pools.get_mut(pool_key).ok_or(GfxError::UnknownHandle {
            kind: ResourceKind::DescriptorPool,
            raw: pool.as_raw(),
        })?;

        if record.sets.len() as u32 >= record.max_sets {
            return Err(GfxError::OutOfPoolMemory);
        }
        let mut needed: HashMap<DescriptorType, u32> = HashMap::new();
        for binding in &bindings {
            *needed.entry(binding.ty).or_insert(0) += binding.count;
        }
        for (ty, count) in &needed {
            let used = record.used.get(ty).copied().unwrap_or(0);
            let capacity = record.capacity.get(ty).copied().unwrap_or(0);
            if used + count > capacity {
                return Err(GfxError::OutOfPoolMemory);
            }
        }
        for (ty, count) in needed {
            *record.used.entry(ty).or_insert(0) += count;
        }

        let set = state.sets.insert(SetRecord {
            pool: pool_key,
            bindings,
            writes: HashMap::new(),
        });
        state.pools[pool_key].sets.push(set);
        Ok(DescriptorSetHandle::from_raw(raw_of(set)))
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        for write in writes {
            let set = state
                .sets
                .get_mut(key_of(write.set.as_raw()))
                .unwrap_or_else(|| panic!("write to unknown or reset {:?}", write.set));
            debug_assert!(set.pool != PoolKey::null());
            let declared = set
                .bindings
                .iter()
                .find(|b| b.binding == write.binding)
                .unwrap_or_else(|| panic!("binding {} not in the set layout", write.binding));
            assert_eq!(
                declared.ty, write.ty,
                "binding {} written with the wrong descriptor type",
                write.binding
            );
            set.writes.insert(write.binding, write.resource);
        }
    }

    fn create_command_pool(&self, queue_family: u32) -> GfxResult<CommandPoolHandle> {
        if queue_family >= self.queue_family_count() {
            return Err(GfxError::InvalidParameters(format!(
                "queue family {queue_family} does not exist"
            )));
        }
        let mut state = self.state.lock();
        let raw = raw_of(state.command_pools.insert(Vec::new()));
        state.record_created(ResourceKind::CommandPool, raw);
        Ok(CommandPoolHandle::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        let buffers = state
            .command_pools
            .remove(key_of(pool.as_raw()))
            .unwrap_or_else(|| panic!("{pool:?} destroyed twice or never created"));
        for buffer in buffers {
            if let Some(record) = state.command_buffers.remove(buffer) {
                assert_ne!(
                    record.state,
                    RecordState::Pending,
                    "command pool destroyed while its work is in flight"
                );
                state.record_destroyed(ResourceKind::CommandBuffer, raw_of(buffer));
            }
        }
        state.record_destroyed(ResourceKind::CommandPool, pool.as_raw());
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        let buffers = state
            .command_pools
            .get(key_of(pool.as_raw()))
            .cloned()
            .unwrap_or_else(|| panic!("reset of unknown {pool:?}"));
        for buffer in buffers {
            let record = &mut state.command_buffers[buffer];
            assert_ne!(record.state, RecordState::Pending);
            record.state = RecordState::Initial;
            record.commands.clear();
        }
    }

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> GfxResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        let pool_key: CommandPoolKey = key_of(pool.as_raw());
        if !state.command_pools.contains_key(pool_key) {
            return Err(GfxError::UnknownHandle {
                kind: ResourceKind::CommandPool,
                raw: pool.as_raw(),
            });
        }
        let key = state.command_buffers.insert(CommandBufferRecord {
            pool: pool_key,
            state: RecordState::Initial,
            commands: Vec::new(),
        });
        state.command_pools[pool_key].push(key);
        let raw = raw_of(key);
        state.record_created(ResourceKind::CommandBuffer, raw);
        Ok(CommandBufferHandle::from_raw(raw))
    }

    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        let key: CommandBufferKey = key_of(command_buffer.as_raw());
        let record = state
            .command_buffers
            .remove(key)
            .unwrap_or_else(|| panic!("{command_buffer:?} freed twice or never allocated"));
        assert_eq!(raw_of(record.pool), pool.as_raw(), "freed into the wrong pool");
        assert_ne!(
            record.state,
            RecordState::Pending,
            "{command_buffer:?} freed while in flight"
        );
        if let Some(buffers) = state.command_pools.get_mut(record.pool) {
            buffers.retain(|b| *b != key);
        }
        state.record_destroyed(ResourceKind::CommandBuffer, command_buffer.as_raw());
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GfxResult<()> {
        let mut state = self.state.lock();
        let record = state
            .command_buffers
            .get_mut(key_of(command_buffer.as_raw()))
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::CommandBuffer,
                raw: command_buffer.as_raw(),
            })?;
        assert!(
            matches!(record.state, RecordState::Initial | RecordState::Executable),
            "{command_buffer:?} begun while {:?}",
            record.state
        );
        record.commands.clear();
        record.state = RecordState::Recording;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GfxResult<()> {
        let mut state = self.state.lock();
        state.recording(command_buffer).state = RecordState::Executable;
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> GfxResult<()> {
        let mut state = self.state.lock();
        let record = state
            .command_buffers
            .get_mut(key_of(command_buffer.as_raw()))
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::CommandBuffer,
                raw: command_buffer.as_raw(),
            })?;
        assert_ne!(
            record.state,
            RecordState::Pending,
            "{command_buffer:?} reset while in flight"
        );
        record.commands.clear();
        record.state = RecordState::Initial;
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        let mut state = self.state.lock();
        let src_key = state.buffer_key(src);
        let dst_key = state.buffer_key(dst);
        let (src_size, dst_size) = (state.buffers[src_key].size, state.buffers[dst_key].size);
        for region in regions {
            assert!(
                region.src_offset + region.size <= src_size
                    && region.dst_offset + region.size <= dst_size,
                "copy region {region:?} out of bounds"
            );
        }
        state.recording(command_buffer).commands.push(Command::CopyBuffer {
            src: src_key,
            dst: dst_key,
            regions: regions.to_vec(),
        });
    }

    fn cmd_fill_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        dst: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    ) {
        let mut state = self.state.lock();
        let dst_key = state.buffer_key(dst);
        assert!(
            offset + size <= state.buffers[dst_key].size,
            "fill range out of bounds"
        );
        state.recording(command_buffer).commands.push(Command::FillBuffer {
            dst: dst_key,
            offset,
            size,
            value,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    ) {
        let mut state = self.state.lock();
        let src_key = state.buffer_key(src);
        let dst_key = state.image_key(dst);
        let image = &state.images[dst_key];
        assert!(
            region.extent.width <= image.extent.width && region.extent.height <= image.extent.height,
            "copy extent larger than the image"
        );
        let needed = region.buffer_offset + region.extent.area() * image.format.bytes_per_texel();
        assert!(
            needed <= state.buffers[src_key].size,
            "source buffer too small for the image copy"
        );
        state
            .recording(command_buffer)
            .commands
            .push(Command::CopyBufferToImage {
                src: src_key,
                dst: dst_key,
                region: *region,
            });
    }

    fn cmd_clear_color_image(
        &self,
        command_buffer: CommandBufferHandle,
        image: ImageHandle,
        color: [f32; 4],
    ) {
        let mut state = self.state.lock();
        let key = state.image_key(image);
        state
            .recording(command_buffer)
            .commands
            .push(Command::ClearColorImage { image: key, color });
    }

    fn create_fence(&self, signaled: bool) -> GfxResult<FenceHandle> {
        let mut state = self.state.lock();
        let raw = raw_of(state.fences.insert(signaled));
        state.record_created(ResourceKind::Fence, raw);
        Ok(FenceHandle::from_raw(raw))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        let key: FenceKey = key_of(fence.as_raw());
        assert!(
            !state.pending.iter().any(|p| p.fence == Some(key)),
            "{fence:?} destroyed while its submission is in flight"
        );
        state
            .fences
            .remove(key)
            .unwrap_or_else(|| panic!("{fence:?} destroyed twice or never created"));
        state.record_destroyed(ResourceKind::Fence, fence.as_raw());
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> GfxResult<()> {
        let mut state = self.state.lock();
        let key: FenceKey = key_of(fence.as_raw());
        let signaled = *state.fences.get(key).ok_or(GfxError::UnknownHandle {
            kind: ResourceKind::Fence,
            raw: fence.as_raw(),
        })?;
        if signaled {
            return Ok(());
        }
        if state.pending.iter().any(|p| p.fence == Some(key)) {
            state.drain_until(Some(key));
            return Ok(());
        }
        // Nothing will ever signal it
        Err(GfxError::Timeout {
            waited_ns: timeout_ns,
        })
    }

    fn reset_fence(&self, fence: FenceHandle) -> GfxResult<()> {
        let mut state = self.state.lock();
        let signaled = state
            .fences
            .get_mut(key_of(fence.as_raw()))
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::Fence,
                raw: fence.as_raw(),
            })?;
        *signaled = false;
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceHandle) -> GfxResult<bool> {
        let state = self.state.lock();
        state
            .fences
            .get(key_of(fence.as_raw()))
            .copied()
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::Fence,
                raw: fence.as_raw(),
            })
    }

    fn create_semaphore(&self) -> GfxResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let raw = raw_of(state.semaphores.insert(()));
        state.record_created(ResourceKind::Semaphore, raw);
        Ok(SemaphoreHandle::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        state
            .semaphores
            .remove(key_of(semaphore.as_raw()))
            .unwrap_or_else(|| panic!("{semaphore:?} destroyed twice or never created"));
        state.record_destroyed(ResourceKind::Semaphore, semaphore.as_raw());
    }

    fn queue_submit(
        &self,
        queue: QueueType,
        submit: &SubmitInfo<'_>,
        fence: FenceHandle,
    ) -> GfxResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.reject_next_submit) {
            return Err(GfxError::OutOfDeviceMemory {
                requested: 0,
                available: 0,
            });
        }
        for semaphore in submit
            .wait_semaphores
            .iter()
            .chain(submit.signal_semaphores.iter())
        {
            if !state.semaphores.contains_key(key_of(semaphore.as_raw())) {
                return Err(GfxError::UnknownHandle {
                    kind: ResourceKind::Semaphore,
                    raw: semaphore.as_raw(),
                });
            }
        }
        let fence_key = if fence.is_null() {
            None
        } else {
            let key: FenceKey = key_of(fence.as_raw());
            let signaled = *state.fences.get(key).ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::Fence,
                raw: fence.as_raw(),
            })?;
            assert!(!signaled, "{fence:?} submitted while still signalled");
            Some(key)
        };

        let mut keys = Vec::with_capacity(submit.command_buffers.len());
        let mut commands = Vec::new();
        for handle in submit.command_buffers {
            let key: CommandBufferKey = key_of(handle.as_raw());
            let record = state
                .command_buffers
                .get_mut(key)
                .unwrap_or_else(|| panic!("submit of unknown {handle:?}"));
            assert_eq!(
                record.state,
                RecordState::Executable,
                "{handle:?} submitted without being recorded"
            );
            record.state = RecordState::Pending;
            commands.extend(record.commands.iter().cloned());
            keys.push(key);
        }

        state.events.push(DeviceEvent::Submitted {
            queue,
            command_buffers: keys.len(),
        });
        state.pending.push_back(PendingSubmission {
            command_buffers: keys,
            commands,
            fence: fence_key,
        });
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let mut state = self.state.lock();
        state.drain_until(None);
        state.events.push(DeviceEvent::WaitIdle);
        Ok(())
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old: SwapchainHandle,
    ) -> GfxResult<SwapchainHandle> {
        if desc.extent.is_empty() || desc.image_count == 0 {
            return Err(GfxError::InvalidParameters(format!(
                "swapchain {}x{} with {} images",
                desc.extent.width, desc.extent.height, desc.image_count
            )));
        }
        let mut state = self.state.lock();
        if !old.is_null() {
            if let Some(retired) = state.swapchains.get_mut(key_of(old.as_raw())) {
                retired.out_of_date = true;
            }
        }
        let key = state.swapchains.insert(SwapchainRecord {
            images: Vec::new(),
            next_image: 0,
            out_of_date: false,
        });
        let len = (desc.extent.area() * desc.format.bytes_per_texel()) as usize;
        let mut images = Vec::with_capacity(desc.image_count as usize);
        for _ in 0..desc.image_count {
            let memory = state.memory.insert(HostMemory::zeroed(len, false, false));
            images.push(state.images.insert(ImageRecord {
                memory,
                extent: desc.extent,
                format: desc.format,
                swapchain: Some(key),
            }));
        }
        state.swapchains[key].images = images;
        let raw = raw_of(key);
        state.record_created(ResourceKind::Swapchain, raw);
        Ok(SwapchainHandle::from_raw(raw))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state.lock();
        let key: SwapchainKey = key_of(swapchain.as_raw());
        let images = state
            .swapchains
            .get(key)
            .map(|record| record.images.clone())
            .unwrap_or_else(|| panic!("{swapchain:?} destroyed twice or never created"));
        for image in &images {
            state.remove_image_views_check(*image);
        }
        for image in images {
            if let Some(record) = state.images.remove(image) {
                state.free_memory(record.memory);
            }
        }
        state.swapchains.remove(key);
        state.record_destroyed(ResourceKind::Swapchain, swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> GfxResult<Vec<ImageHandle>> {
        let state = self.state.lock();
        state
            .swapchains
            .get(key_of(swapchain.as_raw()))
            .map(|record| {
                record
                    .images
                    .iter()
                    .map(|image| ImageHandle::from_raw(raw_of(*image)))
                    .collect()
            })
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::Swapchain,
                raw: swapchain.as_raw(),
            })
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        _timeout_ns: u64,
    ) -> GfxResult<AcquireResult> {
        let mut state = self.state.lock();
        if !state.semaphores.contains_key(key_of(signal.as_raw())) {
            return Err(GfxError::UnknownHandle {
                kind: ResourceKind::Semaphore,
                raw: signal.as_raw(),
            });
        }
        let record = state
            .swapchains
            .get_mut(key_of(swapchain.as_raw()))
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::Swapchain,
                raw: swapchain.as_raw(),
            })?;
        if record.out_of_date {
            return Ok(AcquireResult::OutOfDate);
        }
        let image_index = record.next_image % record.images.len() as u32;
        record.next_image = record.next_image.wrapping_add(1);
        Ok(AcquireResult::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait_semaphores: &[SemaphoreHandle],
    ) -> GfxResult<PresentResult> {
        let mut state = self.state.lock();
        for semaphore in wait_semaphores {
            if !state.semaphores.contains_key(key_of(semaphore.as_raw())) {
                return Err(GfxError::UnknownHandle {
                    kind: ResourceKind::Semaphore,
                    raw: semaphore.as_raw(),
                });
            }
        }
        let record = state
            .swapchains
            .get(key_of(swapchain.as_raw()))
            .ok_or(GfxError::UnknownHandle {
                kind: ResourceKind::Swapchain,
                raw: swapchain.as_raw(),
            })?;
        assert!(
            (image_index as usize) < record.images.len(),
            "present of image {image_index} out of range"
        );
        if record.out_of_date {
            return Ok(PresentResult::OutOfDate);
        }
        state.events.push(DeviceEvent::Presented { image_index });
        Ok(PresentResult::Presented)
    }

    fn create_shader_module(&self, code: &[u32]) -> GfxResult<ShaderModuleHandle> {
        if code.is_empty() {
            return Err(GfxError::InvalidShaderCode("empty module".to_string()));
        }
        let mut state = self.state.lock();
        let raw = raw_of(state.shaders.insert(code.len()));
        state.record_created(ResourceKind::ShaderModule, raw);
        Ok(ShaderModuleHandle::from_raw(raw))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        let mut state = self.state.lock();
        state
            .shaders
            .remove(key_of(module.as_raw()))
            .unwrap_or_else(|| panic!("{module:?} destroyed twice or never created"));
        state.record_destroyed(ResourceKind::ShaderModule, module.as_raw());
    }
}

//! Buffer management for vertex data, uniforms and staging
//!
//! A [`Buffer`] owns a device buffer plus its allocation. Its teardown
//! (unmap if still mapped, then free) is registered with a deletion queue
//! as soon as creation succeeds, so the queue decides when the memory is
//! actually returned.

use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Pod;

use crate::command::CommandPool;
use crate::deletion_queue::DeletionQueue;
use crate::device::{
    Allocation, AllocationHandle, BufferAllocInfo, BufferCopy, BufferHandle, BufferUsage,
    GraphicsDevice, MemoryLocation, RawHandle, ResourceKind,
};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: BufferUsage,
    /// Memory location
    pub location: MemoryLocation,
    /// Map the memory persistently right after creation
    pub want_mapping: bool,
}

impl BufferDesc {
    /// Unmapped buffer
    pub const fn new(size: u64, usage: BufferUsage, location: MemoryLocation) -> Self {
        Self {
            size,
            usage,
            location,
            want_mapping: false,
        }
    }

    /// Request a persistent mapping
    pub const fn mapped(mut self) -> Self {
        self.want_mapping = true;
        self
    }

    /// Host-written uniform buffer, persistently mapped
    pub const fn uniform(size: u64) -> Self {
        Self::new(size, BufferUsage::UNIFORM, MemoryLocation::CpuToGpu).mapped()
    }

    /// Host-written transfer source, persistently mapped
    pub const fn staging(size: u64) -> Self {
        Self::new(size, BufferUsage::TRANSFER_SRC, MemoryLocation::CpuToGpu).mapped()
    }

    /// Device-local buffer that can be filled through transfers
    pub fn device_local(size: u64, usage: BufferUsage) -> Self {
        Self::new(size, usage | BufferUsage::TRANSFER_DST, MemoryLocation::GpuOnly)
    }

    fn alloc_info(&self) -> BufferAllocInfo {
        BufferAllocInfo {
            size: self.size,
            usage: self.usage,
            location: self.location,
        }
    }
}

/// Device buffer plus its allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedBuffer {
    /// Buffer handle
    pub buffer: BufferHandle,
    /// Backing allocation
    pub allocation: Allocation,
}

/// Buffer object for [`ResourceHandle`]
pub struct BufferObject;

impl DeviceObject for BufferObject {
    type Desc = BufferDesc;
    type Raw = AllocatedBuffer;

    const KIND: ResourceKind = ResourceKind::Buffer;
    const NULL: AllocatedBuffer = AllocatedBuffer {
        buffer: BufferHandle::NULL,
        allocation: Allocation {
            handle: AllocationHandle::NULL,
            size: 0,
            host_visible: false,
        },
    };

    fn create(device: &dyn GraphicsDevice, desc: &BufferDesc) -> GfxResult<AllocatedBuffer> {
        if desc.size == 0 {
            return Err(GfxError::InvalidParameters(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        let (buffer, allocation) = device.create_buffer(&desc.alloc_info())?;
        Ok(AllocatedBuffer { buffer, allocation })
    }

    fn destroy(device: &dyn GraphicsDevice, raw: AllocatedBuffer) {
        device.destroy_buffer(raw.buffer, raw.allocation.handle);
    }

    fn allocation(raw: AllocatedBuffer) -> Option<AllocationHandle> {
        Some(raw.allocation.handle)
    }
}

/// Buffer wrapper with memory management
pub struct Buffer {
    handle: ResourceHandle<BufferObject>,
    mapped: Option<NonNull<u8>>,
}

// The mapped pointer is only dereferenced through `&self`/`&mut self`
// methods that bounds-check against the allocation it belongs to.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Create a buffer and register its teardown with `queue`.
    ///
    /// With `want_mapping` the memory is mapped before this returns; a
    /// mapping failure frees the buffer again and returns `MapFailed`.
    pub fn new(
        device: &Arc<dyn GraphicsDevice>,
        queue: &Arc<DeletionQueue>,
        desc: BufferDesc,
        label: &str,
    ) -> GfxResult<Self> {
        let mut handle = ResourceHandle::<BufferObject>::create(device, desc, label)?;
        let mapped = if desc.want_mapping {
            Some(handle.map()?)
        } else {
            None
        };
        handle.defer_to(queue);
        Ok(Self { handle, mapped })
    }

    /// Create a device-local buffer filled with `data` through a staging
    /// copy. Blocks until the copy completed.
    pub fn with_data(
        device: &Arc<dyn GraphicsDevice>,
        queue: &Arc<DeletionQueue>,
        pool: &CommandPool,
        usage: BufferUsage,
        data: &[u8],
        label: &str,
    ) -> GfxResult<Self> {
        let size = data.len() as u64;
        let buffer = Self::new(device, queue, BufferDesc::device_local(size, usage), label)?;

        let staging_queue = Arc::new(DeletionQueue::new(format!("{label}.staging")));
        let mut staging = Self::new(
            device,
            &staging_queue,
            BufferDesc::staging(size),
            &format!("{label}.staging"),
        )?;
        staging.write(0, data)?;

        let (src, dst) = (staging.handle(), buffer.handle());
        pool.immediate_submit(|cmd| {
            cmd.cmd_copy_buffer(src, dst, &[BufferCopy::whole(size)]);
            Ok(())
        })?;

        // The copy has completed, nothing references the staging memory
        staging.release();
        staging_queue.flush();
        Ok(buffer)
    }

    /// Get the buffer handle
    pub fn handle(&self) -> BufferHandle {
        self.handle.expect_live().buffer
    }

    /// Buffer handle, or null once released
    pub fn get(&self) -> BufferHandle {
        self.handle.get().buffer
    }

    /// Allocation metadata
    pub fn allocation(&self) -> Allocation {
        self.handle.expect_live().allocation
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.handle.desc().size
    }

    /// Creation parameters
    pub fn desc(&self) -> &BufferDesc {
        self.handle.desc()
    }

    /// Debug label
    pub fn label(&self) -> &str {
        self.handle.label()
    }

    /// Whether the buffer can still be used
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Persistently mapped address, if mapped
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        if self.handle.is_mapped() {
            self.mapped
        } else {
            None
        }
    }

    /// Whether the memory is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped_ptr().is_some()
    }

    /// Drop the persistent mapping ahead of teardown
    pub fn persistent_unmap(&mut self) {
        self.handle.unmap();
        self.mapped = None;
    }

    fn mapped_range(&self, offset: u64, len: usize) -> GfxResult<NonNull<u8>> {
        let ptr = self.mapped_ptr().ok_or_else(|| {
            GfxError::MapFailed(format!("buffer '{}' is not mapped", self.label()))
        })?;
        offset
            .checked_add(len as u64)
            .filter(|end| *end <= self.size())
            .ok_or_else(|| {
                GfxError::InvalidParameters(format!(
                    "range {offset}+{len} outside buffer '{}' of {} bytes",
                    self.label(),
                    self.size()
                ))
            })?;
        // offset <= size, so the result stays within or one past the mapping
        Ok(unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset as usize)) })
    }

    /// Copy bytes into the mapped memory at `offset`
    pub fn write(&mut self, offset: u64, data: &[u8]) -> GfxResult<()> {
        let dst = self.mapped_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len());
        }
        Ok(())
    }

    /// Copy plain-old-data values into the mapped memory at `offset`
    pub fn write_slice<T: Pod>(&mut self, offset: u64, values: &[T]) -> GfxResult<()> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    /// Read bytes back from the mapped memory
    pub fn read_bytes(&self, offset: u64, len: usize) -> GfxResult<Vec<u8>> {
        let src = self.mapped_range(offset, len)?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Let go of the buffer. The deletion queue frees it on its next flush.
    pub fn release(&mut self) {
        self.mapped = None;
        self.handle.release();
    }

    /// Hand the buffer to `queue`, which frees it unless the queue it was
    /// created with flushes first
    pub fn retire(&mut self, queue: &DeletionQueue) {
        self.mapped = None;
        self.handle.retire(queue);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("label", &self.label())
            .field("handle", &self.get())
            .field("size", &self.size())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPool;
    use crate::device::{DeviceEvent, QueueType, SoftwareDevice};

    fn setup() -> (Arc<SoftwareDevice>, Arc<dyn GraphicsDevice>, Arc<DeletionQueue>) {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        (software, device, Arc::new(DeletionQueue::new("buffers")))
    }

    #[test]
    fn test_mapped_buffers_have_an_address() {
        let (_software, device, queue) = setup();
        let buffer = Buffer::new(&device, &queue, BufferDesc::uniform(64), "ubo").unwrap();
        assert!(buffer.mapped_ptr().is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_sized_buffers_are_rejected() {
        let (software, device, queue) = setup();
        let err = Buffer::new(&device, &queue, BufferDesc::uniform(0), "empty").unwrap_err();
        assert!(matches!(err, GfxError::InvalidParameters(_)));
        assert!(queue.is_empty());
        assert_eq!(software.created_count(ResourceKind::Buffer), 0);
    }

    #[test]
    fn test_failed_mapping_frees_the_buffer() {
        let (software, device, queue) = setup();
        let desc = BufferDesc::new(32, BufferUsage::STORAGE, MemoryLocation::GpuOnly).mapped();
        let err = Buffer::new(&device, &queue, desc, "gpu").unwrap_err();
        assert!(matches!(err, GfxError::MapFailed(_)));
        assert!(queue.is_empty());
        assert_eq!(software.live_count(ResourceKind::Buffer), 0);
    }

    #[test]
    fn test_teardown_unmaps_before_freeing() {
        let (software, device, queue) = setup();
        let mut buffer = Buffer::new(&device, &queue, BufferDesc::uniform(16), "ubo").unwrap();
        let raw = buffer.handle().as_raw();
        let allocation = buffer.allocation().handle.as_raw();
        buffer.release();
        assert_eq!(software.live_count(ResourceKind::Buffer), 1);

        software.clear_events();
        queue.flush();
        assert_eq!(
            software.events(),
            vec![
                DeviceEvent::Unmapped { allocation },
                DeviceEvent::Destroyed {
                    kind: ResourceKind::Buffer,
                    raw
                },
            ]
        );
    }

    #[test]
    fn test_explicit_unmap_is_not_repeated() {
        let (software, device, queue) = setup();
        let mut buffer = Buffer::new(&device, &queue, BufferDesc::staging(8), "s").unwrap();
        buffer.persistent_unmap();
        assert!(buffer.mapped_ptr().is_none());
        drop(buffer);
        queue.flush();
        let unmaps = software
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Unmapped { .. }))
            .count();
        assert_eq!(unmaps, 1);
    }

    #[test]
    fn test_writes_are_bounds_checked() {
        let (_software, device, queue) = setup();
        let mut buffer = Buffer::new(&device, &queue, BufferDesc::uniform(8), "ubo").unwrap();
        buffer.write_slice(0, &[1.0f32, 2.0]).unwrap();
        assert_eq!(
            buffer.read_bytes(4, 4).unwrap(),
            2.0f32.to_le_bytes().to_vec()
        );
        assert!(matches!(
            buffer.write(4, &[0; 8]),
            Err(GfxError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_with_data_uploads_through_staging() {
        let (software, device, queue) = setup();
        let pool = CommandPool::new(&device, QueueType::Transfer, "upload").unwrap();
        let data: Vec<u8> = (0..32).collect();
        let buffer =
            Buffer::with_data(&device, &queue, &pool, BufferUsage::VERTEX, &data, "vb").unwrap();

        assert_eq!(software.read_buffer(buffer.handle()), data);
        assert_eq!(software.live_count(ResourceKind::Buffer), 1);
        assert_eq!(queue.len(), 1);
    }
}

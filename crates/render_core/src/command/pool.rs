//! Command pools and the one-shot submission pattern

use std::sync::Arc;

use super::CommandBuffer;
use crate::device::{
    CommandPoolHandle, GraphicsDevice, QueueType, RawHandle, ResourceKind, SubmitInfo,
};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};
use crate::sync::Fence;

/// Command pool object; the descriptor is the queue family index
pub struct CommandPoolObject;

impl DeviceObject for CommandPoolObject {
    type Desc = u32;
    type Raw = CommandPoolHandle;

    const KIND: ResourceKind = ResourceKind::CommandPool;
    const NULL: CommandPoolHandle = CommandPoolHandle::NULL;

    fn create(device: &dyn GraphicsDevice, queue_family: &u32) -> GfxResult<CommandPoolHandle> {
        device.create_command_pool(*queue_family)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: CommandPoolHandle) {
        device.destroy_command_pool(raw);
    }
}

/// Default wait for one-shot submissions
pub const DEFAULT_SUBMIT_TIMEOUT_NS: u64 = 1_000_000_000;

/// Command pool tied to one queue
pub struct CommandPool {
    handle: ResourceHandle<CommandPoolObject>,
    queue: QueueType,
    timeout_ns: u64,
}

impl CommandPool {
    /// Create a new command pool for the family serving `queue`
    pub fn new(device: &Arc<dyn GraphicsDevice>, queue: QueueType, label: &str) -> GfxResult<Self> {
        let family = device.queue_family_index(queue).ok_or_else(|| {
            GfxError::InvalidParameters(format!("no queue family serves {queue:?}"))
        })?;
        Ok(Self {
            handle: ResourceHandle::create(device, family, label)?,
            queue,
            timeout_ns: DEFAULT_SUBMIT_TIMEOUT_NS,
        })
    }

    /// Override how long one-shot submissions wait before reporting device loss
    pub fn with_timeout(mut self, timeout_ns: u64) -> Self {
        self.timeout_ns = timeout_ns;
        self
    }

    /// Get the command pool handle
    pub fn handle(&self) -> CommandPoolHandle {
        self.handle.expect_live()
    }

    /// Queue submissions from this pool go to
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Queue family index of the pool
    pub fn queue_family(&self) -> u32 {
        *self.handle.desc()
    }

    fn device(&self) -> &Arc<dyn GraphicsDevice> {
        self.handle.device()
    }

    /// Allocate a primary command buffer
    pub fn allocate(&self) -> GfxResult<CommandBuffer> {
        let pool = self.handle();
        let command_buffer = self.device().allocate_command_buffer(pool)?;
        Ok(CommandBuffer::new(Arc::clone(self.device()), pool, command_buffer))
    }

    /// Return every command buffer of the pool to the initial state
    pub fn reset(&self) {
        self.device().reset_command_pool(self.handle());
    }

    /// Allocate a command buffer and start recording a one-shot sequence
    pub fn begin_single_time_commands(&self) -> GfxResult<CommandBuffer> {
        let mut command_buffer = self.allocate()?;
        if let Err(err) = command_buffer.begin() {
            self.device()
                .free_command_buffer(self.handle(), command_buffer.handle());
            return Err(err);
        }
        Ok(command_buffer)
    }

    /// Submit a one-shot sequence and block until the device finished it.
    ///
    /// Never use this in the per-frame path: it drains the queue. A wait
    /// that times out is reported as [`GfxError::DeviceLost`].
    pub fn end_single_time_commands(&self, mut command_buffer: CommandBuffer) -> GfxResult<()> {
        let device = self.device();
        let raw = command_buffer.end()?;
        let fence = Fence::new(device, false, "single_time")?;

        device.queue_submit(
            self.queue,
            &SubmitInfo {
                command_buffers: &[raw],
                ..Default::default()
            },
            fence.handle(),
        )?;
        fence.wait(self.timeout_ns)?;

        device.free_command_buffer(self.handle(), raw);
        log::trace!("One-shot submission on {:?} completed", self.queue);
        Ok(())
    }

    /// Record with `record`, submit, and wait for completion
    pub fn immediate_submit<F>(&self, record: F) -> GfxResult<()>
    where
        F: FnOnce(&mut CommandBuffer) -> GfxResult<()>,
    {
        let mut command_buffer = self.begin_single_time_commands()?;
        if let Err(err) = record(&mut command_buffer) {
            command_buffer.reset()?;
            self.device()
                .free_command_buffer(self.handle(), command_buffer.handle());
            return Err(err);
        }
        self.end_single_time_commands(command_buffer)
    }
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("handle", &self.handle.get())
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        BufferAllocInfo, BufferCopy, BufferUsage, MemoryLocation, SoftwareDevice,
    };

    fn setup() -> (Arc<SoftwareDevice>, Arc<dyn GraphicsDevice>) {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        (software, device)
    }

    #[test]
    fn test_single_time_commands_complete_before_returning() {
        let (software, device) = setup();
        let pool = CommandPool::new(&device, QueueType::Transfer, "upload").unwrap();
        assert_eq!(pool.queue_family(), 1);

        let info = BufferAllocInfo {
            size: 16,
            usage: BufferUsage::TRANSFER_DST,
            location: MemoryLocation::GpuOnly,
        };
        let (dst, _) = device.create_buffer(&info).unwrap();

        let mut cmd = pool.begin_single_time_commands().unwrap();
        cmd.cmd_fill_buffer(dst, 0, 16, 0xABAB_ABAB);
        pool.end_single_time_commands(cmd).unwrap();

        assert_eq!(software.read_buffer(dst), vec![0xAB; 16]);
        assert_eq!(software.pending_submissions(), 0);
        assert_eq!(software.live_count(ResourceKind::CommandBuffer), 0);
        assert_eq!(software.live_count(ResourceKind::Fence), 0);
    }

    #[test]
    fn test_failed_recording_frees_the_buffer() {
        let (software, device) = setup();
        let pool = CommandPool::new(&device, QueueType::Graphics, "gfx").unwrap();
        let err = pool
            .immediate_submit(|_| Err(GfxError::InvalidParameters("nothing to do".into())))
            .unwrap_err();
        assert!(matches!(err, GfxError::InvalidParameters(_)));
        assert_eq!(software.live_count(ResourceKind::CommandBuffer), 0);
        assert_eq!(software.pending_submissions(), 0);
    }

    #[test]
    fn test_immediate_submit_copies() {
        let (software, device) = setup();
        let pool = CommandPool::new(&device, QueueType::Graphics, "gfx").unwrap();
        let host = BufferAllocInfo {
            size: 4,
            usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
            location: MemoryLocation::CpuToGpu,
        };
        let (a, _) = device.create_buffer(&host).unwrap();
        let (b, _) = device.create_buffer(&host).unwrap();
        pool.immediate_submit(|cmd| {
            cmd.cmd_fill_buffer(a, 0, 4, u32::from_le_bytes([1, 2, 3, 4]));
            cmd.cmd_copy_buffer(a, b, &[BufferCopy::whole(4)]);
            Ok(())
        })
        .unwrap();
        assert_eq!(software.read_buffer(b), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_dropping_the_pool_destroys_it() {
        let (software, device) = setup();
        let pool = CommandPool::new(&device, QueueType::Compute, "compute").unwrap();
        let _cmd = pool.allocate().unwrap();
        drop(pool);
        assert_eq!(software.live_count(ResourceKind::CommandPool), 0);
    }
}

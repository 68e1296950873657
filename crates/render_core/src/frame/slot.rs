//! Per-frame-in-flight state

use std::sync::Arc;

use crate::command::{CommandBuffer, CommandPool};
use crate::config::DescriptorPoolConfig;
use crate::deletion_queue::DeletionQueue;
use crate::descriptor::DescriptorAllocator;
use crate::device::{GraphicsDevice, QueueType};
use crate::error::GfxResult;
use crate::sync::FrameSync;

/// Everything one frame in flight owns.
///
/// The slot is reused every `frames_in_flight` frames. Its fence tells when
/// the GPU is done with it; after that wait its deletion queue is flushed,
/// its descriptor pools are reset and its command buffer is re-recorded.
pub struct FrameSlot {
    index: usize,
    pub(crate) sync: FrameSync,
    pub(crate) command_buffer: CommandBuffer,
    pub(crate) command_pool: CommandPool,
    pub(crate) deletion_queue: Arc<DeletionQueue>,
    pub(crate) descriptors: DescriptorAllocator,
}

impl FrameSlot {
    /// Create the slot for frame `index`
    pub fn new(
        device: &Arc<dyn GraphicsDevice>,
        index: usize,
        descriptor_pool: DescriptorPoolConfig,
        fence_timeout_ns: u64,
    ) -> GfxResult<Self> {
        let command_pool = CommandPool::new(device, QueueType::Graphics, &format!("frame{index}.commands"))?
            .with_timeout(fence_timeout_ns);
        Ok(Self {
            index,
            sync: FrameSync::new(device, index)?,
            command_buffer: command_pool.allocate()?,
            command_pool,
            deletion_queue: Arc::new(DeletionQueue::new(format!("frame{index}"))),
            descriptors: DescriptorAllocator::new(
                device,
                descriptor_pool,
                &format!("frame{index}.descriptors"),
            ),
        })
    }

    /// Slot index, in `0..frames_in_flight`
    pub fn index(&self) -> usize {
        self.index
    }

    /// Synchronization objects
    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Resources freed once this slot's frame has completed
    pub fn deletion_queue(&self) -> &Arc<DeletionQueue> {
        &self.deletion_queue
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("index", &self.index)
            .field("pending_deletions", &self.deletion_queue.len())
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

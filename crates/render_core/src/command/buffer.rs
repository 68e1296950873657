//! Command buffer recording

use std::sync::Arc;

use crate::device::{
    BufferCopy, BufferHandle, BufferImageCopy, CommandBufferHandle, CommandPoolHandle,
    GraphicsDevice, ImageHandle,
};
use crate::error::GfxResult;

/// Primary command buffer drawn from a [`CommandPool`](super::CommandPool).
///
/// The pool owns the underlying object; dropping this value does not free it.
pub struct CommandBuffer {
    device: Arc<dyn GraphicsDevice>,
    pool: CommandPoolHandle,
    command_buffer: CommandBufferHandle,
    recording: bool,
}

impl CommandBuffer {
    pub(crate) fn new(
        device: Arc<dyn GraphicsDevice>,
        pool: CommandPoolHandle,
        command_buffer: CommandBufferHandle,
    ) -> Self {
        Self {
            device,
            pool,
            command_buffer,
            recording: false,
        }
    }

    /// Begin command recording
    pub fn begin(&mut self) -> GfxResult<&mut Self> {
        assert!(!self.recording, "command buffer already recording");
        self.device.begin_command_buffer(self.command_buffer)?;
        self.recording = true;
        Ok(self)
    }

    /// End command recording
    pub fn end(&mut self) -> GfxResult<CommandBufferHandle> {
        assert!(self.recording, "command buffer not recording");
        self.device.end_command_buffer(self.command_buffer)?;
        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Discard recorded commands
    pub fn reset(&mut self) -> GfxResult<()> {
        self.device.reset_command_buffer(self.command_buffer)?;
        self.recording = false;
        Ok(())
    }

    /// Whether commands can be recorded
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Get the command buffer handle
    pub fn handle(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// Pool the buffer was allocated from
    pub fn pool(&self) -> CommandPoolHandle {
        self.pool
    }

    fn check_recording(&self) {
        assert!(self.recording, "command recorded outside begin/end");
    }

    /// Copy regions between buffers
    pub fn cmd_copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, regions: &[BufferCopy]) {
        self.check_recording();
        self.device
            .cmd_copy_buffer(self.command_buffer, src, dst, regions);
    }

    /// Fill a buffer range with a repeated 32-bit value
    pub fn cmd_fill_buffer(&mut self, dst: BufferHandle, offset: u64, size: u64, value: u32) {
        self.check_recording();
        self.device
            .cmd_fill_buffer(self.command_buffer, dst, offset, size, value);
    }

    /// Copy buffer contents into the first mip of an image
    pub fn cmd_copy_buffer_to_image(
        &mut self,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    ) {
        self.check_recording();
        self.device
            .cmd_copy_buffer_to_image(self.command_buffer, src, dst, region);
    }

    /// Clear a color image
    pub fn cmd_clear_color_image(&mut self, image: ImageHandle, color: [f32; 4]) {
        self.check_recording();
        self.device
            .cmd_clear_color_image(self.command_buffer, image, color);
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.command_buffer)
            .field("recording", &self.recording)
            .finish()
    }
}

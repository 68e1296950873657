//! Frame orchestration
//!
//! [`RenderContext`] owns the swapchain, the frame slots and every deletion
//! queue, and drives the per-frame state machine:
//!
//! ```text
//! Idle --prepare_frame--> FramePrepared --submit_frame--> FrameSubmitted --> Idle
//! ```
//!
//! It is the only place deletion queues are flushed: a frame slot's queue
//! right after that slot's fence was waited, the render target queue after
//! device idle in [`RenderContext::recreate_target`], and the lifetime
//! queue at shutdown.

use std::sync::Arc;

use crate::command::{CommandBuffer, CommandPool};
use crate::config::RenderConfig;
use crate::deletion_queue::DeletionQueue;
use crate::descriptor::{DescriptorAllocator, DescriptorBuilder, DescriptorLayoutCache};
use crate::device::{
    AcquireResult, BufferUsage, Extent2D, GraphicsDevice, ImageHandle, ImageViewHandle,
    PresentResult, QueueType, SubmitInfo, SwapchainDesc,
};
use crate::error::{GfxError, GfxResult};
use crate::resources::{Buffer, BufferDesc, Image, ImageDesc, ImageView};
use crate::shader::{ShaderLibrary, ShaderModule};

use super::slot::FrameSlot;
use super::surface::RenderSurface;
use super::swapchain::Swapchain;

/// Where the context is in the frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// No frame in progress
    Idle,
    /// An image is acquired and commands can be recorded
    FramePrepared,
    /// Commands were submitted, presentation is under way
    FrameSubmitted,
}

/// Description of a prepared frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame slot in use, in `0..frames_in_flight`
    pub frame_index: usize,
    /// Swapchain image being rendered
    pub image_index: u32,
    /// Render target size
    pub extent: Extent2D,
    /// Frames submitted before this one
    pub frame_number: u64,
}

/// Result of [`RenderContext::prepare_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PrepareOutcome {
    /// Record commands, then call [`RenderContext::submit_frame`]
    Ready(FrameInfo),
    /// The render target no longer matches the surface. Call
    /// [`RenderContext::recreate_target`] and try again.
    OutOfDate,
}

/// Result of [`RenderContext::submit_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SubmitOutcome {
    /// The frame was presented
    Presented,
    /// The frame was submitted but the target must be recreated before the
    /// next one
    OutOfDate,
}

/// Owner of all per-frame and target-sized GPU state
pub struct RenderContext {
    config: RenderConfig,
    device: Arc<dyn GraphicsDevice>,
    surface: Box<dyn RenderSurface>,
    swapchain: Option<Swapchain>,
    frames: Vec<FrameSlot>,
    current_frame: usize,
    frame_count: u64,
    state: FrameState,
    prepared: Option<FrameInfo>,
    upload_pool: Option<CommandPool>,
    layout_cache: DescriptorLayoutCache,
    shaders: ShaderLibrary,
    lifetime_queue: Arc<DeletionQueue>,
    target_queue: Arc<DeletionQueue>,
    shut_down: bool,
}

impl RenderContext {
    /// Create the context: frame slots, upload pool, caches and the first
    /// render target
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        surface: Box<dyn RenderSurface>,
        config: RenderConfig,
    ) -> GfxResult<Self> {
        config
            .validate()
            .map_err(|e| GfxError::InvalidParameters(e.to_string()))?;
        log::info!(
            "Creating render context on '{}' with {} frames in flight",
            device.name(),
            config.frames_in_flight
        );

        let frames = (0..config.frames_in_flight)
            .map(|index| {
                FrameSlot::new(
                    &device,
                    index,
                    config.descriptor_pool.clone(),
                    config.fence_timeout_ns,
                )
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let upload_pool = CommandPool::new(&device, QueueType::Graphics, "upload")?
            .with_timeout(config.fence_timeout_ns);

        let mut context = Self {
            layout_cache: DescriptorLayoutCache::new(&device),
            shaders: ShaderLibrary::with_search_dirs(&device, config.shader_search_dirs.iter()),
            lifetime_queue: Arc::new(DeletionQueue::new("lifetime")),
            target_queue: Arc::new(DeletionQueue::new("render_target")),
            swapchain: None,
            frames,
            current_frame: 0,
            frame_count: 0,
            state: FrameState::Idle,
            prepared: None,
            upload_pool: Some(upload_pool),
            surface,
            device,
            config,
            shut_down: false,
        };
        context.build_target()?;
        Ok(context)
    }

    fn build_target(&mut self) -> GfxResult<()> {
        let extent = self.surface.extent();
        if extent.is_empty() {
            log::warn!("Surface is {}x{}, render target not created", extent.width, extent.height);
            return Ok(());
        }
        let desc = SwapchainDesc {
            extent,
            image_count: self.config.swapchain_image_count,
            format: self.surface.format(),
        };
        self.swapchain = Some(Swapchain::new(&self.device, &self.target_queue, desc)?);
        Ok(())
    }

    fn upload_pool(&self) -> &CommandPool {
        self.upload_pool
            .as_ref()
            .unwrap_or_else(|| panic!("render context used after shutdown"))
    }

    fn slot(&self) -> &FrameSlot {
        &self.frames[self.current_frame]
    }

    fn assert_prepared(&self, what: &str) {
        assert_eq!(
            self.state,
            FrameState::FramePrepared,
            "{what} called with no prepared frame"
        );
    }

    /// Begin a frame.
    ///
    /// Waits for the current slot's previous submission, flushes the slot's
    /// deletion queue, resets its descriptor pools and acquires the next
    /// image. Returns [`PrepareOutcome::OutOfDate`] when the target no longer
    /// matches the surface; the state stays `Idle` in that case.
    pub fn prepare_frame(&mut self) -> GfxResult<PrepareOutcome> {
        assert_eq!(
            self.state,
            FrameState::Idle,
            "prepare_frame called while a frame is in progress"
        );
        let timeout = self.config.fence_timeout_ns;
        let frame_index = self.current_frame;

        let slot = &mut self.frames[frame_index];
        slot.sync.in_flight.wait(timeout)?;
        let freed = slot.deletion_queue.flush();
        if freed > 0 {
            log::trace!("Frame slot {frame_index} freed {freed} deferred object(s)");
        }
        slot.descriptors.reset_pools();

        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(PrepareOutcome::OutOfDate);
        };
        if swapchain.extent() != self.surface.extent() {
            log::warn!(
                "Render target {:?} does not match surface {:?}, recreation needed",
                swapchain.extent(),
                self.surface.extent()
            );
            return Ok(PrepareOutcome::OutOfDate);
        }

        let slot = &mut self.frames[frame_index];
        let image_index = match self.device.acquire_next_image(
            swapchain.handle(),
            slot.sync.image_available.handle(),
            timeout,
        ) {
            Ok(AcquireResult::Acquired {
                image_index,
                suboptimal,
            }) => {
                if suboptimal {
                    log::debug!("Acquired image {image_index} from a suboptimal swapchain");
                }
                image_index
            }
            Ok(AcquireResult::OutOfDate) => {
                log::warn!("Swapchain out of date during acquire, recreation needed");
                return Ok(PrepareOutcome::OutOfDate);
            }
            Err(GfxError::Timeout { waited_ns }) => {
                log::error!("Image acquire timed out after {waited_ns} ns");
                return Err(GfxError::DeviceLost(format!(
                    "image acquire timed out after {waited_ns} ns"
                )));
            }
            Err(err) => return Err(err),
        };

        // Only reset once an image is acquired, so an early return leaves the
        // fence signalled for the next attempt
        slot.sync.in_flight.reset()?;
        slot.command_pool.reset();
        slot.command_buffer.begin()?;

        let info = FrameInfo {
            frame_index,
            image_index,
            extent: swapchain.extent(),
            frame_number: self.frame_count,
        };
        self.prepared = Some(info);
        self.state = FrameState::FramePrepared;
        log::trace!("Frame {} prepared: {info:?}", self.frame_count);
        Ok(PrepareOutcome::Ready(info))
    }

    /// Command buffer of the prepared frame
    pub fn commands(&mut self) -> &mut CommandBuffer {
        self.assert_prepared("commands");
        &mut self.frames[self.current_frame].command_buffer
    }

    /// Info of the prepared frame, if any
    pub fn prepared_frame(&self) -> Option<FrameInfo> {
        self.prepared
    }

    /// Swapchain image of the prepared frame
    pub fn frame_image(&self) -> ImageHandle {
        self.assert_prepared("frame_image");
        self.target_image(|swapchain, index| swapchain.image(index))
    }

    /// View over the swapchain image of the prepared frame
    pub fn frame_view(&self) -> ImageViewHandle {
        self.assert_prepared("frame_view");
        self.target_image(|swapchain, index| swapchain.view(index))
    }

    fn target_image<R>(&self, pick: impl FnOnce(&Swapchain, u32) -> R) -> R {
        let (Some(swapchain), Some(info)) = (self.swapchain.as_ref(), self.prepared) else {
            unreachable!("a prepared frame always has a render target");
        };
        pick(swapchain, info.image_index)
    }

    /// Submit the recorded commands and present.
    ///
    /// On return the context is `Idle` again and the next frame slot is
    /// current, whether or not presentation succeeded.
    pub fn submit_frame(&mut self) -> GfxResult<SubmitOutcome> {
        self.assert_prepared("submit_frame");
        let Some(info) = self.prepared else {
            unreachable!("prepared state without frame info");
        };
        let Some(swapchain) = self.swapchain.as_ref() else {
            unreachable!("a prepared frame always has a render target");
        };

        let slot = &mut self.frames[self.current_frame];
        let wait = [slot.sync.image_available.handle()];
        let signal = [slot.sync.render_finished.handle()];
        let submitted = slot.command_buffer.end().and_then(|command_buffer| {
            self.device.queue_submit(
                QueueType::Graphics,
                &SubmitInfo {
                    command_buffers: &[command_buffer],
                    wait_semaphores: &wait,
                    signal_semaphores: &signal,
                },
                slot.sync.in_flight.handle(),
            )
        });
        if let Err(err) = submitted {
            // Nothing will signal the slot fence; the frame is abandoned and
            // the slot made ready for another attempt
            log::error!("Frame {} submission failed: {err}", self.frame_count);
            self.prepared = None;
            self.state = FrameState::Idle;
            if let Err(recover) = slot.sync.recover_unsubmitted() {
                log::error!("Frame slot {} could not be recovered: {recover}", slot.index());
            }
            return Err(err);
        }
        self.prepared = None;
        self.state = FrameState::FrameSubmitted;

        let present = self
            .device
            .queue_present(swapchain.handle(), info.image_index, &signal);

        self.current_frame = (self.current_frame + 1) % self.frames.len();
        self.frame_count += 1;
        self.state = FrameState::Idle;

        match present? {
            PresentResult::Presented => Ok(SubmitOutcome::Presented),
            PresentResult::Suboptimal | PresentResult::OutOfDate => {
                log::warn!("Swapchain out of date during present, recreation needed");
                Ok(SubmitOutcome::OutOfDate)
            }
        }
    }

    /// Rebuild the render target for the current surface size.
    ///
    /// Waits for the device to go idle, frees everything registered with the
    /// target deletion queue (swapchain, its views and any target-sized
    /// resources) and creates a new swapchain. Target-sized resources must
    /// be recreated by their owners afterwards.
    pub fn recreate_target(&mut self) -> GfxResult<()> {
        assert_eq!(
            self.state,
            FrameState::Idle,
            "recreate_target called while a frame is in progress"
        );
        log::info!("Recreating render target for surface {:?}", self.surface.extent());
        self.device.wait_idle()?;

        self.swapchain = None;
        let freed = self.target_queue.flush();
        log::debug!("Render target teardown freed {freed} object(s)");

        self.build_target()
    }

    /// Run a one-shot command sequence and block until it completed.
    ///
    /// For uploads and setup work outside the frame loop only.
    pub fn immediate_submit<F>(&self, record: F) -> GfxResult<()>
    where
        F: FnOnce(&mut CommandBuffer) -> GfxResult<()>,
    {
        self.upload_pool().immediate_submit(record)
    }

    /// Create a buffer that lives until shutdown or until it is handed to
    /// [`RenderContext::retire_buffer`]
    pub fn create_buffer(&self, desc: BufferDesc, label: &str) -> GfxResult<Buffer> {
        Buffer::new(&self.device, &self.lifetime_queue, desc, label)
    }

    /// Queue of the slot whose fence covers every frame recorded so far:
    /// the current slot while a frame is being recorded, else the slot of
    /// the last submitted frame
    fn retire_queue(&self) -> &DeletionQueue {
        let index = if self.state == FrameState::FramePrepared {
            self.current_frame
        } else {
            (self.current_frame + self.frames.len() - 1) % self.frames.len()
        };
        &self.frames[index].deletion_queue
    }

    /// Free a long-lived buffer once no frame in flight can still use it.
    ///
    /// The buffer goes to the queue of the latest frame slot and is freed
    /// after that slot's fence is next waited.
    pub fn retire_buffer(&self, mut buffer: Buffer) {
        buffer.retire(self.retire_queue());
    }

    /// Free a long-lived image and its views once no frame in flight can
    /// still use them
    pub fn retire_image(&self, mut image: Image, views: impl IntoIterator<Item = ImageView>) {
        let queue = self.retire_queue();
        image.retire(queue);
        for mut view in views {
            view.retire(queue);
        }
    }

    /// Create a device-local buffer filled with `data`
    pub fn upload_buffer(&self, usage: BufferUsage, data: &[u8], label: &str) -> GfxResult<Buffer> {
        Buffer::with_data(
            &self.device,
            &self.lifetime_queue,
            self.upload_pool(),
            usage,
            data,
            label,
        )
    }

    /// Create a buffer freed once the current frame slot comes around again.
    ///
    /// Meant for per-frame transient data; requires a prepared frame.
    pub fn create_frame_buffer(&self, desc: BufferDesc, label: &str) -> GfxResult<Buffer> {
        self.assert_prepared("create_frame_buffer");
        Buffer::new(&self.device, &self.slot().deletion_queue, desc, label)
    }

    /// Create an image that lives until shutdown
    pub fn create_image(&self, desc: ImageDesc, label: &str) -> GfxResult<Image> {
        Image::new(&self.device, &self.lifetime_queue, desc, label)
    }

    /// Create an image freed on the next render target recreation
    pub fn create_target_image(&self, desc: ImageDesc, label: &str) -> GfxResult<Image> {
        Image::new(&self.device, &self.target_queue, desc, label)
    }

    /// Load a shader, or return the cached module
    pub fn shader(&self, path: &str) -> GfxResult<Arc<ShaderModule>> {
        self.shaders.get_or_load(path)
    }

    /// Shader cache
    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    /// Descriptor set layout cache
    pub fn layout_cache(&self) -> &DescriptorLayoutCache {
        &self.layout_cache
    }

    /// Descriptor allocator of the current frame slot; its sets are valid
    /// until the slot is prepared again
    pub fn frame_descriptors(&mut self) -> &mut DescriptorAllocator {
        &mut self.frames[self.current_frame].descriptors
    }

    /// Start building a descriptor set from the current frame's allocator
    pub fn descriptor_builder(&mut self) -> DescriptorBuilder<'_> {
        DescriptorBuilder::begin(
            &self.layout_cache,
            &mut self.frames[self.current_frame].descriptors,
        )
    }

    /// Queue flushed at shutdown
    pub fn deletion_queue(&self) -> &Arc<DeletionQueue> {
        &self.lifetime_queue
    }

    /// Queue of the current frame slot, flushed once that slot's GPU work
    /// has completed
    pub fn frame_deletion_queue(&self) -> &Arc<DeletionQueue> {
        &self.slot().deletion_queue
    }

    /// Queue flushed whenever the render target is recreated
    pub fn target_deletion_queue(&self) -> &Arc<DeletionQueue> {
        &self.target_queue
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> GfxResult<()> {
        self.device.wait_idle()
    }

    /// Device the context renders with
    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    /// Render target size, zero while no target exists
    pub fn extent(&self) -> Extent2D {
        self.swapchain
            .as_ref()
            .map_or_else(Extent2D::default, Swapchain::extent)
    }

    /// Configuration the context was created with
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Frames submitted so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Index of the current frame slot
    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Wait for the device, then free every resource the context tracks.
    ///
    /// Runs once; later calls and the drop that follows do nothing.
    pub fn shutdown(&mut self) -> GfxResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        log::info!("Shutting down render context after {} frames", self.frame_count);

        let idle = self.device.wait_idle();
        if let Err(err) = &idle {
            log::error!("Device did not go idle before shutdown: {err}");
        }
        if self.state == FrameState::FramePrepared {
            log::warn!("Shutting down with an unsubmitted frame");
            self.prepared = None;
            self.state = FrameState::Idle;
        }

        self.swapchain = None;
        self.target_queue.flush();
        for slot in &self.frames {
            slot.deletion_queue.flush();
        }
        self.frames.clear();
        self.upload_pool = None;
        self.shaders.clear();
        self.layout_cache.clear();
        let freed = self.lifetime_queue.flush();
        log::debug!("Lifetime queue freed {freed} object(s)");
        idle
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Render context shutdown failed: {err}");
        }
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("state", &self.state)
            .field("frame", &self.current_frame)
            .field("frame_count", &self.frame_count)
            .field("swapchain", &self.swapchain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceEvent, ResourceKind, SoftwareDevice};
    use crate::frame::HeadlessSurface;

    fn context(width: u32, height: u32) -> (Arc<SoftwareDevice>, HeadlessSurface, RenderContext) {
        let software = Arc::new(SoftwareDevice::new());
        let surface = HeadlessSurface::new(width, height);
        let ctx = RenderContext::new(
            software.clone(),
            Box::new(surface.clone()),
            RenderConfig::default(),
        )
        .unwrap();
        (software, surface, ctx)
    }

    fn run_frame(ctx: &mut RenderContext) -> FrameInfo {
        let PrepareOutcome::Ready(info) = ctx.prepare_frame().unwrap() else {
            panic!("frame unexpectedly out of date");
        };
        let image = ctx.frame_image();
        ctx.commands().cmd_clear_color_image(image, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(ctx.submit_frame().unwrap(), SubmitOutcome::Presented);
        info
    }

    #[test]
    fn test_state_machine_cycles_through_slots() {
        let (_software, _surface, mut ctx) = context(64, 64);
        assert_eq!(ctx.state(), FrameState::Idle);

        let indices: Vec<_> = (0..5).map(|_| run_frame(&mut ctx).frame_index).collect();
        assert_eq!(indices, vec![0, 1, 0, 1, 0]);
        assert_eq!(ctx.frame_count(), 5);
        assert_eq!(ctx.current_frame_index(), 1);
        assert_eq!(ctx.state(), FrameState::Idle);
    }

    #[test]
    fn test_frame_queue_flushes_when_the_slot_returns() {
        let (software, _surface, mut ctx) = context(32, 32);
        let _ = ctx.prepare_frame().unwrap();
        let mut transient = ctx.create_frame_buffer(BufferDesc::uniform(256), "ubo").unwrap();
        transient.release();
        let _ = ctx.submit_frame().unwrap();
        assert_eq!(software.live_count(ResourceKind::Buffer), 1);

        // Slot 1
        run_frame(&mut ctx);
        assert_eq!(software.live_count(ResourceKind::Buffer), 1);

        // Slot 0 again: its fence is waited, then its queue flushed
        run_frame(&mut ctx);
        assert_eq!(software.live_count(ResourceKind::Buffer), 0);
    }

    #[test]
    fn test_resize_reports_out_of_date_until_recreated() {
        let (software, surface, mut ctx) = context(64, 48);
        run_frame(&mut ctx);

        surface.resize(128, 96);
        assert_eq!(ctx.prepare_frame().unwrap(), PrepareOutcome::OutOfDate);
        assert_eq!(ctx.state(), FrameState::Idle);

        ctx.recreate_target().unwrap();
        assert_eq!(ctx.extent(), Extent2D::new(128, 96));
        let info = run_frame(&mut ctx);
        assert_eq!(info.extent, Extent2D::new(128, 96));
        assert_eq!(software.live_count(ResourceKind::Swapchain), 1);
    }

    #[test]
    fn test_invalidated_swapchain_is_out_of_date() {
        let (software, _surface, mut ctx) = context(64, 64);
        software.invalidate_swapchains();
        assert_eq!(ctx.prepare_frame().unwrap(), PrepareOutcome::OutOfDate);
        ctx.recreate_target().unwrap();
        run_frame(&mut ctx);
    }

    #[test]
    fn test_present_out_of_date_still_advances() {
        let (software, _surface, mut ctx) = context(64, 64);
        let _ = ctx.prepare_frame().unwrap();
        software.invalidate_swapchains();
        assert_eq!(ctx.submit_frame().unwrap(), SubmitOutcome::OutOfDate);
        assert_eq!(ctx.current_frame_index(), 1);
        assert_eq!(ctx.state(), FrameState::Idle);
    }

    #[test]
    fn test_minimised_surface_waits_for_a_size() {
        let (_software, surface, mut ctx) = context(64, 64);
        surface.resize(0, 0);
        assert_eq!(ctx.prepare_frame().unwrap(), PrepareOutcome::OutOfDate);
        ctx.recreate_target().unwrap();
        assert_eq!(ctx.prepare_frame().unwrap(), PrepareOutcome::OutOfDate);

        surface.resize(16, 16);
        ctx.recreate_target().unwrap();
        run_frame(&mut ctx);
    }

    #[test]
    fn test_failed_submit_returns_to_idle() {
        let (software, _surface, mut ctx) = context(32, 32);
        let _ = ctx.prepare_frame().unwrap();
        software.reject_next_submit();
        let err = ctx.submit_frame().unwrap_err();
        assert!(err.is_allocation_failure());
        assert_eq!(ctx.state(), FrameState::Idle);
        assert_eq!(ctx.prepared_frame(), None);
        assert_eq!(ctx.current_frame_index(), 0);
        assert_eq!(ctx.frame_count(), 0);

        // The same slot prepares again without waiting on a dead fence
        let info = run_frame(&mut ctx);
        assert_eq!(info.frame_index, 0);
        assert_eq!(ctx.frame_count(), 1);
    }

    #[test]
    fn test_retire_targets_the_slot_of_the_last_frame() {
        let (software, _surface, mut ctx) = context(32, 32);
        let buffer = ctx.create_buffer(BufferDesc::uniform(64), "instances").unwrap();
        run_frame(&mut ctx);
        ctx.retire_buffer(buffer);
        assert_eq!(ctx.frames[0].deletion_queue.len(), 1);

        run_frame(&mut ctx);
        assert_eq!(software.live_count(ResourceKind::Buffer), 1);
        run_frame(&mut ctx);
        assert_eq!(software.live_count(ResourceKind::Buffer), 0);
    }

    #[test]
    #[should_panic(expected = "no prepared frame")]
    fn test_recording_without_a_frame_panics() {
        let (_software, _surface, mut ctx) = context(8, 8);
        let _ = ctx.commands();
    }

    #[test]
    fn test_shutdown_frees_everything() {
        let (software, _surface, mut ctx) = context(64, 64);
        let _buffer = ctx.create_buffer(BufferDesc::uniform(64), "camera").unwrap();
        run_frame(&mut ctx);
        ctx.shutdown().unwrap();

        for kind in [
            ResourceKind::Buffer,
            ResourceKind::Swapchain,
            ResourceKind::ImageView,
            ResourceKind::Fence,
            ResourceKind::Semaphore,
            ResourceKind::CommandPool,
            ResourceKind::DescriptorPool,
        ] {
            assert_eq!(software.live_count(kind), 0, "{kind} leaked");
        }
        assert!(software
            .events()
            .iter()
            .any(|e| matches!(e, DeviceEvent::WaitIdle)));
    }
}

//! Synchronization primitives for GPU/CPU coordination
//!
//! Semaphores order work between GPU operations (acquire, render, present);
//! fences let the CPU wait for submitted work. Both are owned through
//! [`ResourceHandle`] and destroyed when dropped.

use std::sync::Arc;

use crate::device::{FenceHandle, GraphicsDevice, RawHandle, ResourceKind, SemaphoreHandle};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};

/// Fence object; the descriptor is the initial signalled state
pub struct FenceObject;

impl DeviceObject for FenceObject {
    type Desc = bool;
    type Raw = FenceHandle;

    const KIND: ResourceKind = ResourceKind::Fence;
    const NULL: FenceHandle = FenceHandle::NULL;

    fn create(device: &dyn GraphicsDevice, signaled: &bool) -> GfxResult<FenceHandle> {
        device.create_fence(*signaled)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: FenceHandle) {
        device.destroy_fence(raw);
    }
}

/// Semaphore object
pub struct SemaphoreObject;

impl DeviceObject for SemaphoreObject {
    type Desc = ();
    type Raw = SemaphoreHandle;

    const KIND: ResourceKind = ResourceKind::Semaphore;
    const NULL: SemaphoreHandle = SemaphoreHandle::NULL;

    fn create(device: &dyn GraphicsDevice, _desc: &()) -> GfxResult<SemaphoreHandle> {
        device.create_semaphore()
    }

    fn destroy(device: &dyn GraphicsDevice, raw: SemaphoreHandle) {
        device.destroy_semaphore(raw);
    }
}

/// GPU-GPU synchronization primitive
#[derive(Debug)]
pub struct Semaphore {
    handle: ResourceHandle<SemaphoreObject>,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: &Arc<dyn GraphicsDevice>, label: &str) -> GfxResult<Self> {
        Ok(Self {
            handle: ResourceHandle::create(device, (), label)?,
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> SemaphoreHandle {
        self.handle.expect_live()
    }
}

/// Fence wrapper
#[derive(Debug)]
pub struct Fence {
    handle: ResourceHandle<FenceObject>,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: &Arc<dyn GraphicsDevice>, signaled: bool, label: &str) -> GfxResult<Self> {
        Ok(Self {
            handle: ResourceHandle::create(device, signaled, label)?,
        })
    }

    /// Wait for the fence.
    ///
    /// A timeout is reported as [`GfxError::DeviceLost`]: submitted work that
    /// does not finish in time is never retried.
    pub fn wait(&self, timeout_ns: u64) -> GfxResult<()> {
        match self.handle.device().wait_for_fence(self.handle(), timeout_ns) {
            Err(GfxError::Timeout { waited_ns }) => {
                log::error!(
                    "Fence '{}' not signalled after {waited_ns} ns",
                    self.handle.label()
                );
                Err(GfxError::DeviceLost(format!(
                    "fence '{}' timed out after {waited_ns} ns",
                    self.handle.label()
                )))
            }
            other => other,
        }
    }

    /// Reset fence
    pub fn reset(&self) -> GfxResult<()> {
        self.handle.device().reset_fence(self.handle())
    }

    /// Non-blocking status query
    pub fn is_signaled(&self) -> GfxResult<bool> {
        self.handle.device().fence_signaled(self.handle())
    }

    /// Get the fence handle
    pub fn handle(&self) -> FenceHandle {
        self.handle.expect_live()
    }
}

/// Synchronization objects of one frame in flight
#[derive(Debug)]
pub struct FrameSync {
    /// Signalled when the swapchain image is ready
    pub image_available: Semaphore,
    /// Signalled when rendering finished, waited by present
    pub render_finished: Semaphore,
    /// Signalled when the frame's submission completed
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects; the fence starts signalled so
    /// the first wait on it returns immediately
    pub fn new(device: &Arc<dyn GraphicsDevice>, frame: usize) -> GfxResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device, &format!("frame{frame}.image_available"))?,
            render_finished: Semaphore::new(device, &format!("frame{frame}.render_finished"))?,
            in_flight: Fence::new(device, true, &format!("frame{frame}.in_flight"))?,
        })
    }

    /// Restore the state `prepare` expects after an acquired frame was never
    /// submitted: a signalled fence and an unsignalled acquire semaphore
    pub(crate) fn recover_unsubmitted(&mut self) -> GfxResult<()> {
        self.in_flight.handle.recreate(true)?;
        self.image_available.handle.recreate(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    #[test]
    fn test_frame_sync_starts_signalled() {
        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new());
        let sync = FrameSync::new(&device, 0).unwrap();
        assert!(sync.in_flight.is_signaled().unwrap());
        sync.in_flight.wait(1).unwrap();
        sync.in_flight.reset().unwrap();
        assert!(!sync.in_flight.is_signaled().unwrap());
    }

    #[test]
    fn test_fence_timeout_is_device_lost() {
        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new());
        let fence = Fence::new(&device, false, "never").unwrap();
        let err = fence.wait(10).unwrap_err();
        assert!(matches!(err, GfxError::DeviceLost(_)));
    }

    #[test]
    fn test_dropping_frees_the_objects() {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        drop(FrameSync::new(&device, 1).unwrap());
        assert_eq!(software.live_count(ResourceKind::Semaphore), 0);
        assert_eq!(software.live_count(ResourceKind::Fence), 0);
    }
}

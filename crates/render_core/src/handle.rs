//! Uniform lifecycle for device-backed objects
//!
//! A [`ResourceHandle`] owns one device object together with the parameters
//! it was created from. It is either live or released, and the transition
//! happens exactly once. Teardown is either immediate (on release or drop)
//! or handed to a [`DeletionQueue`] at creation time, in which case the
//! queue decides when the device object is actually freed.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::deletion_queue::{DeletionQueue, DeletionTask};
use crate::device::{AllocationHandle, GraphicsDevice, ResourceKind};
use crate::error::{GfxError, GfxResult};

/// Create/destroy capability of one kind of device object
pub trait DeviceObject: Sized + 'static {
    /// Creation parameters, kept for recreation
    type Desc: Clone + fmt::Debug + Send + Sync + 'static;
    /// Raw value(s) the device hands back
    type Raw: Copy + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Object kind
    const KIND: ResourceKind;
    /// Value reported by a released handle
    const NULL: Self::Raw;

    /// Create the device object
    fn create(device: &dyn GraphicsDevice, desc: &Self::Desc) -> GfxResult<Self::Raw>;

    /// Free the device object
    fn destroy(device: &dyn GraphicsDevice, raw: Self::Raw);

    /// Backing memory, for objects that can be host mapped
    fn allocation(_raw: Self::Raw) -> Option<AllocationHandle> {
        None
    }
}

#[derive(Default)]
struct HandleState {
    /// The owning wrapper let go of the object
    detached: AtomicBool,
    /// The device object has been freed
    destroyed: AtomicBool,
    /// The backing memory is currently mapped
    mapped: AtomicBool,
}

enum Teardown {
    Immediate,
    Queued(Arc<DeletionQueue>),
}

/// Exclusive owner of one device object
pub struct ResourceHandle<T: DeviceObject> {
    device: Arc<dyn GraphicsDevice>,
    raw: T::Raw,
    desc: T::Desc,
    label: String,
    state: Arc<HandleState>,
    teardown: Teardown,
}

impl<T: DeviceObject> ResourceHandle<T> {
    /// Create an object that is destroyed when the handle is released or dropped
    pub fn create(
        device: &Arc<dyn GraphicsDevice>,
        desc: T::Desc,
        label: impl Into<String>,
    ) -> GfxResult<Self> {
        let raw = T::create(device.as_ref(), &desc)?;
        Ok(Self::assemble(device, raw, desc, label.into(), Teardown::Immediate))
    }

    /// Create an object whose teardown is registered with `queue` right away.
    ///
    /// The device object lives until the queue is flushed, however long the
    /// handle itself lives.
    pub fn create_deferred(
        device: &Arc<dyn GraphicsDevice>,
        desc: T::Desc,
        label: impl Into<String>,
        queue: &Arc<DeletionQueue>,
    ) -> GfxResult<Self> {
        let mut handle = Self::create(device, desc, label)?;
        handle.defer_to(queue);
        Ok(handle)
    }

    /// Hand teardown of a live, immediately owned object to `queue`.
    ///
    /// From here on the queue frees the object; releasing the handle only
    /// lets go of it. No-op for handles that are already deferred.
    pub fn defer_to(&mut self, queue: &Arc<DeletionQueue>) {
        if !self.is_live() || self.is_deferred() {
            return;
        }
        self.enqueue(queue);
        self.teardown = Teardown::Queued(Arc::clone(queue));
    }

    /// Take ownership of an object created elsewhere
    pub fn adopt(
        device: &Arc<dyn GraphicsDevice>,
        raw: T::Raw,
        desc: T::Desc,
        label: impl Into<String>,
    ) -> Self {
        Self::assemble(device, raw, desc, label.into(), Teardown::Immediate)
    }

    fn assemble(
        device: &Arc<dyn GraphicsDevice>,
        raw: T::Raw,
        desc: T::Desc,
        label: String,
        teardown: Teardown,
    ) -> Self {
        log::debug!("Created {} '{label}' {raw:?}", T::KIND);
        Self {
            device: Arc::clone(device),
            raw,
            desc,
            label,
            state: Arc::new(HandleState::default()),
            teardown,
        }
    }

    fn enqueue(&self, queue: &DeletionQueue) {
        let device = Arc::clone(&self.device);
        let state = Arc::clone(&self.state);
        let settled = Arc::clone(&self.state);
        let raw = self.raw;
        queue.push_task(
            DeletionTask::new(T::KIND, self.label.clone(), move || {
                Self::destroy_now(device.as_ref(), raw, &state);
            })
            .with_settled(move || settled.destroyed.load(Ordering::Acquire)),
        );
    }

    fn destroy_now(device: &dyn GraphicsDevice, raw: T::Raw, state: &HandleState) {
        if state.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if state.mapped.swap(false, Ordering::AcqRel) {
            if let Some(allocation) = T::allocation(raw) {
                device.unmap_memory(allocation);
            }
        }
        T::destroy(device, raw);
    }

    /// Live raw value, or the null sentinel once released
    pub fn get(&self) -> T::Raw {
        if self.is_live() {
            self.raw
        } else {
            T::NULL
        }
    }

    /// Live raw value; panics if the handle was released
    pub fn expect_live(&self) -> T::Raw {
        assert!(
            self.is_live(),
            "use of released {} '{}'",
            T::KIND,
            self.label
        );
        self.raw
    }

    /// Whether the object can still be used
    pub fn is_live(&self) -> bool {
        !self.state.detached.load(Ordering::Acquire)
            && !self.state.destroyed.load(Ordering::Acquire)
    }

    /// Creation parameters
    pub fn desc(&self) -> &T::Desc {
        &self.desc
    }

    /// Debug label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Object kind
    pub fn kind(&self) -> ResourceKind {
        T::KIND
    }

    /// Device the object belongs to
    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    /// Whether teardown was handed to a deletion queue at creation
    pub fn is_deferred(&self) -> bool {
        matches!(self.teardown, Teardown::Queued(_))
    }

    /// Persistently map the backing memory
    pub fn map(&self) -> GfxResult<NonNull<u8>> {
        let raw = self.expect_live();
        let allocation = T::allocation(raw).ok_or_else(|| {
            GfxError::MapFailed(format!("{} '{}' has no host memory", T::KIND, self.label))
        })?;
        if self.state.mapped.load(Ordering::Acquire) {
            return Err(GfxError::MapFailed(format!(
                "{} '{}' is already mapped",
                T::KIND,
                self.label
            )));
        }
        let ptr = self.device.map_memory(allocation)?;
        self.state.mapped.store(true, Ordering::Release);
        Ok(ptr)
    }

    /// Undo [`ResourceHandle::map`]; no-op if not mapped
    pub fn unmap(&self) {
        if !self.is_live() || !self.state.mapped.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(allocation) = T::allocation(self.raw) {
            self.device.unmap_memory(allocation);
        }
    }

    /// Whether the backing memory is mapped
    pub fn is_mapped(&self) -> bool {
        self.is_live() && self.state.mapped.load(Ordering::Acquire)
    }

    /// Release the object. Calling this more than once does nothing.
    ///
    /// Immediate handles free the device object here. Deferred handles only
    /// let go of it; the queue they registered with frees it on flush.
    pub fn release(&mut self) {
        if self.state.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.teardown {
            Teardown::Immediate => {
                log::debug!("Destroying {} '{}'", T::KIND, self.label);
                Self::destroy_now(self.device.as_ref(), self.raw, &self.state);
            }
            Teardown::Queued(_) => {
                log::trace!("Released {} '{}' (freed on flush)", T::KIND, self.label);
            }
        }
    }

    /// Hand the object to `queue` instead of destroying it now.
    ///
    /// Used when an object may still be referenced by in-flight work, as
    /// when a long-lived resource is dropped mid-frame. A deferred handle is
    /// freed by whichever of `queue` and its own queue flushes first; the
    /// entry left in the other one is pruned.
    pub fn retire(&mut self, queue: &DeletionQueue) {
        if !self.is_live() {
            return;
        }
        log::debug!("Retiring {} '{}' to '{}'", T::KIND, self.label, queue.name());
        self.enqueue(queue);
        self.state.detached.store(true, Ordering::Release);
    }

    /// Release the current object and create a new one from `desc`, keeping
    /// the same teardown policy
    pub fn recreate(&mut self, desc: T::Desc) -> GfxResult<()> {
        self.release();
        let raw = T::create(self.device.as_ref(), &desc)?;
        self.raw = raw;
        self.desc = desc;
        self.state = Arc::new(HandleState::default());
        if let Teardown::Queued(queue) = &self.teardown {
            self.enqueue(queue);
        }
        log::debug!("Recreated {} '{}' {raw:?}", T::KIND, self.label);
        Ok(())
    }
}

impl<T: DeviceObject> Drop for ResourceHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: DeviceObject> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &T::KIND)
            .field("label", &self.label)
            .field("raw", &self.get())
            .field("desc", &self.desc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FenceHandle, RawHandle, SoftwareDevice};
    use crate::sync::FenceObject;

    fn device() -> (Arc<SoftwareDevice>, Arc<dyn GraphicsDevice>) {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        (software, device)
    }

    #[test]
    fn test_release_twice_destroys_once() {
        let (software, device) = device();
        let mut fence = ResourceHandle::<FenceObject>::create(&device, false, "f").unwrap();
        assert!(fence.is_live());

        fence.release();
        fence.release();
        drop(fence);

        assert_eq!(software.created_count(ResourceKind::Fence), 1);
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 1);
    }

    #[test]
    fn test_released_handles_report_null() {
        let (_software, device) = device();
        let mut fence = ResourceHandle::<FenceObject>::create(&device, true, "f").unwrap();
        assert!(!fence.get().is_null());
        fence.release();
        assert_eq!(fence.get(), FenceHandle::NULL);
    }

    #[test]
    #[should_panic(expected = "use of released fence")]
    fn test_expect_live_panics_after_release() {
        let (_software, device) = device();
        let mut fence = ResourceHandle::<FenceObject>::create(&device, true, "f").unwrap();
        fence.release();
        fence.expect_live();
    }

    #[test]
    fn test_deferred_handles_are_freed_by_the_queue() {
        let (software, device) = device();
        let queue = Arc::new(DeletionQueue::new("q"));
        let fence =
            ResourceHandle::<FenceObject>::create_deferred(&device, false, "f", &queue).unwrap();
        drop(fence);
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 0);

        queue.flush();
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 1);
    }

    #[test]
    fn test_flushing_invalidates_a_live_deferred_handle() {
        let (software, device) = device();
        let queue = Arc::new(DeletionQueue::new("q"));
        let mut fence =
            ResourceHandle::<FenceObject>::create_deferred(&device, false, "f", &queue).unwrap();
        queue.flush();
        assert!(!fence.is_live());
        fence.release();
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 1);
    }

    #[test]
    fn test_retire_defers_destruction() {
        let (software, device) = device();
        let queue = DeletionQueue::new("retired");
        let mut fence = ResourceHandle::<FenceObject>::create(&device, false, "f").unwrap();
        fence.retire(&queue);
        assert!(!fence.is_live());
        drop(fence);
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 0);
        queue.flush();
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 1);
    }

    #[test]
    fn test_retired_deferred_handle_is_freed_by_the_earlier_flush() {
        let (software, device) = device();
        let lifetime = Arc::new(DeletionQueue::new("lifetime"));
        let frame = DeletionQueue::new("frame");
        let mut fence =
            ResourceHandle::<FenceObject>::create_deferred(&device, false, "f", &lifetime).unwrap();
        fence.retire(&frame);
        assert!(!fence.is_live());
        drop(fence);
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 0);

        frame.flush();
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 1);

        // The stale lifetime entry goes with the next registration
        lifetime.push(ResourceKind::Fence, "other", || {});
        assert_eq!(lifetime.len(), 1);
        lifetime.flush();
        assert_eq!(software.destroyed_count(ResourceKind::Fence), 1);
    }

    #[test]
    fn test_recreate_swaps_the_object() {
        let (software, device) = device();
        let mut fence = ResourceHandle::<FenceObject>::create(&device, false, "f").unwrap();
        let before = fence.get();
        fence.recreate(true).unwrap();
        assert_ne!(fence.get(), before);
        assert!(*fence.desc());
        assert_eq!(software.live_count(ResourceKind::Fence), 1);
    }
}

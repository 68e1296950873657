//! Structural deduplication of descriptor set layouts

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{
    DescriptorBinding, DescriptorSetLayoutHandle, GraphicsDevice, RawHandle, ResourceKind,
};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};

/// Descriptor set layout object; the descriptor is the canonical binding list
pub struct DescriptorSetLayoutObject;

impl DeviceObject for DescriptorSetLayoutObject {
    type Desc = Vec<DescriptorBinding>;
    type Raw = DescriptorSetLayoutHandle;

    const KIND: ResourceKind = ResourceKind::DescriptorSetLayout;
    const NULL: DescriptorSetLayoutHandle = DescriptorSetLayoutHandle::NULL;

    fn create(
        device: &dyn GraphicsDevice,
        bindings: &Vec<DescriptorBinding>,
    ) -> GfxResult<DescriptorSetLayoutHandle> {
        device.create_descriptor_set_layout(bindings)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: DescriptorSetLayoutHandle) {
        device.destroy_descriptor_set_layout(raw);
    }
}

/// Descriptor set layout wrapper with automatic cleanup
#[derive(Debug)]
pub struct DescriptorSetLayout {
    handle: ResourceHandle<DescriptorSetLayoutObject>,
}

impl DescriptorSetLayout {
    /// Get the descriptor set layout handle
    pub fn handle(&self) -> DescriptorSetLayoutHandle {
        self.handle.expect_live()
    }

    /// Get the bindings used in this layout, sorted by slot
    pub fn bindings(&self) -> &[DescriptorBinding] {
        self.handle.desc()
    }
}

/// Canonical form of a binding list: sorted by slot, no duplicate slots,
/// no empty bindings
pub fn canonical_bindings(bindings: &[DescriptorBinding]) -> GfxResult<Vec<DescriptorBinding>> {
    let mut sorted = bindings.to_vec();
    sorted.sort_by_key(|b| b.binding);
    if let Some(pair) = sorted.windows(2).find(|w| w[0].binding == w[1].binding) {
        return Err(GfxError::InvalidParameters(format!(
            "descriptor binding slot {} declared twice",
            pair[0].binding
        )));
    }
    if let Some(empty) = sorted.iter().find(|b| b.count == 0) {
        return Err(GfxError::InvalidParameters(format!(
            "descriptor binding slot {} has zero descriptors",
            empty.binding
        )));
    }
    Ok(sorted)
}

/// Cache returning one shared layout per distinct binding shape
pub struct DescriptorLayoutCache {
    device: Arc<dyn GraphicsDevice>,
    layouts: Mutex<HashMap<Vec<DescriptorBinding>, Arc<DescriptorSetLayout>>>,
}

impl DescriptorLayoutCache {
    /// Create an empty cache
    pub fn new(device: &Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device: Arc::clone(device),
            layouts: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached layout for `bindings`, creating it on first use.
    ///
    /// The key is every (slot, type, stages, count) tuple, so two requests
    /// resolve to the same layout exactly when those tuples match.
    pub fn get_or_create(
        &self,
        bindings: &[DescriptorBinding],
    ) -> GfxResult<Arc<DescriptorSetLayout>> {
        let key = canonical_bindings(bindings)?;
        let mut layouts = self.layouts.lock();
        if let Some(layout) = layouts.get(&key) {
            return Ok(Arc::clone(layout));
        }

        let label = format!("layout#{}", layouts.len());
        let layout = Arc::new(DescriptorSetLayout {
            handle: ResourceHandle::create(&self.device, key.clone(), label)?,
        });
        log::debug!("Layout cache miss, {} layout(s) cached", layouts.len() + 1);
        layouts.insert(key, Arc::clone(&layout));
        Ok(layout)
    }

    /// Number of distinct layouts
    pub fn len(&self) -> usize {
        self.layouts.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.layouts.lock().is_empty()
    }

    /// Drop every cached layout. Layouts still referenced elsewhere live on
    /// until their last `Arc` goes away.
    pub fn clear(&self) {
        self.layouts.lock().clear();
    }
}

impl std::fmt::Debug for DescriptorLayoutCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorLayoutCache")
            .field("layouts", &self.len())
            .finish()
    }
}

//! Growable descriptor set allocator

use std::sync::Arc;

use crate::config::DescriptorPoolConfig;
use crate::device::{
    DescriptorPoolHandle, DescriptorPoolSize, DescriptorSetHandle, GraphicsDevice, RawHandle,
    ResourceKind,
};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};

use super::DescriptorSetLayout;

/// Descriptor pool creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    /// Sets the pool can hold
    pub max_sets: u32,
    /// Per-type capacities
    pub sizes: Vec<DescriptorPoolSize>,
}

/// Descriptor pool object
pub struct DescriptorPoolObject;

impl DeviceObject for DescriptorPoolObject {
    type Desc = DescriptorPoolDesc;
    type Raw = DescriptorPoolHandle;

    const KIND: ResourceKind = ResourceKind::DescriptorPool;
    const NULL: DescriptorPoolHandle = DescriptorPoolHandle::NULL;

    fn create(
        device: &dyn GraphicsDevice,
        desc: &DescriptorPoolDesc,
    ) -> GfxResult<DescriptorPoolHandle> {
        device.create_descriptor_pool(desc.max_sets, &desc.sizes)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: DescriptorPoolHandle) {
        device.destroy_descriptor_pool(raw);
    }
}

type DescriptorPool = ResourceHandle<DescriptorPoolObject>;

/// A descriptor set drawn from a [`DescriptorAllocator`].
///
/// Valid until the allocator's pools are reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSet {
    handle: DescriptorSetHandle,
}

impl DescriptorSet {
    /// Get the descriptor set handle
    pub fn handle(&self) -> DescriptorSetHandle {
        self.handle
    }
}

/// Allocates descriptor sets, adding a pool whenever the current one is full.
///
/// Pools are only destroyed with the allocator; [`reset_pools`] recycles
/// them for the next generation of sets.
///
/// [`reset_pools`]: DescriptorAllocator::reset_pools
pub struct DescriptorAllocator {
    device: Arc<dyn GraphicsDevice>,
    config: DescriptorPoolConfig,
    label: String,
    current: Option<DescriptorPool>,
    /// Sets drawn from `current` since it became current
    current_sets: u32,
    full: Vec<DescriptorPool>,
    free: Vec<DescriptorPool>,
    created: usize,
}

impl DescriptorAllocator {
    /// Create an allocator; no pool exists until the first allocation
    pub fn new(device: &Arc<dyn GraphicsDevice>, config: DescriptorPoolConfig, label: &str) -> Self {
        Self {
            device: Arc::clone(device),
            config,
            label: label.to_string(),
            current: None,
            current_sets: 0,
            full: Vec::new(),
            free: Vec::new(),
            created: 0,
        }
    }

    fn grab_pool(&mut self) -> GfxResult<DescriptorPool> {
        if let Some(pool) = self.free.pop() {
            return Ok(pool);
        }
        let desc = DescriptorPoolDesc {
            max_sets: self.config.sets_per_pool,
            sizes: self.config.pool_sizes(),
        };
        let pool = ResourceHandle::create(
            &self.device,
            desc,
            format!("{}.pool{}", self.label, self.created),
        )?;
        self.created += 1;
        log::debug!(
            "Descriptor allocator '{}' created pool #{}",
            self.label,
            self.created
        );
        Ok(pool)
    }

    fn current_pool(&mut self) -> GfxResult<DescriptorPoolHandle> {
        let pool = match self.current.take() {
            Some(pool) => pool,
            None => {
                self.current_sets = 0;
                self.grab_pool()?
            }
        };
        let handle = pool.expect_live();
        self.current = Some(pool);
        Ok(handle)
    }

    fn try_allocate(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: &DescriptorSetLayout,
    ) -> GfxResult<Option<DescriptorSet>> {
        match self.device.allocate_descriptor_set(pool, layout.handle()) {
            Ok(handle) => {
                self.current_sets += 1;
                Ok(Some(DescriptorSet { handle }))
            }
            Err(GfxError::OutOfPoolMemory) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn does_not_fit(&self, layout: &DescriptorSetLayout) -> GfxError {
        GfxError::InvalidParameters(format!(
            "layout with {} binding(s) does not fit an empty pool of '{}'",
            layout.bindings().len(),
            self.label
        ))
    }

    /// Allocate one set for `layout`.
    ///
    /// When the current pool is exhausted it is retired and the allocation
    /// retried once against a fresh pool. A layout that an empty pool cannot
    /// hold is rejected without growing.
    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> GfxResult<DescriptorSet> {
        let pool = self.current_pool()?;
        if let Some(set) = self.try_allocate(pool, layout)? {
            return Ok(set);
        }
        if self.current_sets == 0 {
            return Err(self.does_not_fit(layout));
        }

        log::debug!("Descriptor pool of '{}' exhausted, growing", self.label);
        if let Some(exhausted) = self.current.take() {
            self.full.push(exhausted);
        }
        let pool = self.current_pool()?;
        self.try_allocate(pool, layout)?
            .ok_or_else(|| self.does_not_fit(layout))
    }

    /// Return every set to the pools. Sets allocated before are invalid
    /// afterwards; the pools themselves are kept.
    pub fn reset_pools(&mut self) {
        let pools: Vec<_> = self
            .current
            .take()
            .into_iter()
            .chain(self.full.drain(..))
            .collect();
        for pool in pools {
            self.device.reset_descriptor_pool(pool.expect_live());
            self.free.push(pool);
        }
        self.current_sets = 0;
    }

    /// Pools owned by the allocator, in use or not
    pub fn pool_count(&self) -> usize {
        usize::from(self.current.is_some()) + self.full.len() + self.free.len()
    }

    pub(crate) fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }
}

impl std::fmt::Debug for DescriptorAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorAllocator")
            .field("label", &self.label)
            .field("pools", &self.pool_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolRatio;
    use crate::descriptor::DescriptorLayoutCache;
    use crate::device::{DescriptorBinding, DescriptorType, ShaderStages, SoftwareDevice};

    fn small_pools(sets: u32) -> DescriptorPoolConfig {
        DescriptorPoolConfig {
            sets_per_pool: sets,
            ratios: vec![PoolRatio {
                ty: DescriptorType::UniformBuffer,
                per_set: 1.0,
            }],
        }
    }

    fn setup() -> (Arc<SoftwareDevice>, Arc<dyn GraphicsDevice>, DescriptorLayoutCache) {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        let cache = DescriptorLayoutCache::new(&device);
        (software, device, cache)
    }

    #[test]
    fn test_overflow_grows_exactly_one_pool() {
        let (software, device, cache) = setup();
        let layout = cache
            .get_or_create(&[DescriptorBinding::new(
                0,
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )])
            .unwrap();
        let mut allocator = DescriptorAllocator::new(&device, small_pools(4), "test");

        for _ in 0..4 {
            allocator.allocate(&layout).unwrap();
        }
        assert_eq!(allocator.pool_count(), 1);

        allocator.allocate(&layout).unwrap();
        assert_eq!(allocator.pool_count(), 2);
        assert_eq!(software.created_count(ResourceKind::DescriptorPool), 2);
    }

    #[test]
    fn test_reset_reuses_pools() {
        let (software, device, cache) = setup();
        let layout = cache
            .get_or_create(&[DescriptorBinding::new(
                0,
                DescriptorType::UniformBuffer,
                ShaderStages::FRAGMENT,
            )])
            .unwrap();
        let mut allocator = DescriptorAllocator::new(&device, small_pools(2), "frame");
        for _ in 0..5 {
            allocator.allocate(&layout).unwrap();
        }
        assert_eq!(allocator.pool_count(), 3);

        allocator.reset_pools();
        for _ in 0..5 {
            allocator.allocate(&layout).unwrap();
        }
        assert_eq!(allocator.pool_count(), 3);
        assert_eq!(software.created_count(ResourceKind::DescriptorPool), 3);
        assert_eq!(software.destroyed_count(ResourceKind::DescriptorPool), 0);

        drop(allocator);
        assert_eq!(software.live_count(ResourceKind::DescriptorPool), 0);
    }

    #[test]
    fn test_oversized_layouts_are_rejected() {
        let (_software, device, cache) = setup();
        let mut binding =
            DescriptorBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX);
        binding.count = 100;
        let layout = cache.get_or_create(&[binding]).unwrap();
        let mut allocator = DescriptorAllocator::new(&device, small_pools(4), "tiny");
        let err = allocator.allocate(&layout).unwrap_err();
        assert!(matches!(err, GfxError::InvalidParameters(_)));
    }

    #[test]
    fn test_repeated_oversized_allocations_do_not_grow() {
        let (software, device, cache) = setup();
        let mut binding =
            DescriptorBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX);
        binding.count = 1000;
        let layout = cache.get_or_create(&[binding]).unwrap();
        let mut allocator =
            DescriptorAllocator::new(&device, DescriptorPoolConfig::default(), "oversized");

        for _ in 0..10 {
            assert!(allocator.allocate(&layout).is_err());
        }
        assert_eq!(allocator.pool_count(), 1);
        assert_eq!(software.created_count(ResourceKind::DescriptorPool), 1);
    }

    #[test]
    fn test_oversized_layout_after_a_partly_used_pool_grows_once() {
        let (software, device, cache) = setup();
        let small = cache
            .get_or_create(&[DescriptorBinding::new(
                0,
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )])
            .unwrap();
        let mut binding =
            DescriptorBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT);
        binding.count = 100;
        let huge = cache.get_or_create(&[binding]).unwrap();
        let mut allocator = DescriptorAllocator::new(&device, small_pools(4), "mixed");

        allocator.allocate(&small).unwrap();
        for _ in 0..5 {
            assert!(allocator.allocate(&huge).is_err());
        }
        assert_eq!(allocator.pool_count(), 2);
        allocator.allocate(&small).unwrap();
        assert_eq!(software.created_count(ResourceKind::DescriptorPool), 2);
    }
}

//! Fluent descriptor set construction

use std::sync::Arc;

use super::{DescriptorAllocator, DescriptorLayoutCache, DescriptorSet, DescriptorSetLayout};
use crate::device::{
    BufferHandle, DescriptorBinding, DescriptorResource, DescriptorType, DescriptorWrite,
    ImageLayout, ImageViewHandle, ShaderStages,
};
use crate::error::GfxResult;
use crate::resources::Buffer;

/// Single-use builder composing bound resources into a descriptor set.
///
/// The layout comes from the cache and the set from the allocator.
/// `build` consumes the builder, so it cannot be reused.
#[must_use = "a descriptor builder does nothing until `build` is called"]
pub struct DescriptorBuilder<'a> {
    cache: &'a DescriptorLayoutCache,
    allocator: &'a mut DescriptorAllocator,
    bindings: Vec<DescriptorBinding>,
    resources: Vec<(u32, DescriptorType, DescriptorResource)>,
}

impl<'a> DescriptorBuilder<'a> {
    /// Start a new set
    pub fn begin(cache: &'a DescriptorLayoutCache, allocator: &'a mut DescriptorAllocator) -> Self {
        Self {
            cache,
            allocator,
            bindings: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Bind a buffer range
    pub fn bind_buffer(
        mut self,
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
        range: u64,
        ty: DescriptorType,
        stages: ShaderStages,
    ) -> Self {
        assert!(ty.is_buffer(), "{ty:?} cannot reference a buffer");
        self.bindings.push(DescriptorBinding::new(binding, ty, stages));
        self.resources.push((
            binding,
            ty,
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            },
        ));
        self
    }

    /// Bind the full range of a buffer
    pub fn bind_whole_buffer(
        self,
        binding: u32,
        buffer: &Buffer,
        ty: DescriptorType,
        stages: ShaderStages,
    ) -> Self {
        self.bind_buffer(binding, buffer.handle(), 0, buffer.size(), ty, stages)
    }

    /// Bind an image view
    pub fn bind_image(
        mut self,
        binding: u32,
        view: ImageViewHandle,
        layout: ImageLayout,
        ty: DescriptorType,
        stages: ShaderStages,
    ) -> Self {
        assert!(!ty.is_buffer(), "{ty:?} cannot reference an image");
        self.bindings.push(DescriptorBinding::new(binding, ty, stages));
        self.resources
            .push((binding, ty, DescriptorResource::Image { view, layout }));
        self
    }

    /// Resolve the layout, allocate a set and write every bound resource
    pub fn build(self) -> GfxResult<(DescriptorSet, Arc<DescriptorSetLayout>)> {
        let layout = self.cache.get_or_create(&self.bindings)?;
        let set = self.allocator.allocate(&layout)?;

        let writes: Vec<DescriptorWrite> = self
            .resources
            .iter()
            .map(|&(binding, ty, resource)| DescriptorWrite {
                set: set.handle(),
                binding,
                ty,
                resource,
            })
            .collect();
        self.allocator.device().update_descriptor_sets(&writes);
        Ok((set, layout))
    }

    /// Resolve only the layout, without allocating a set
    pub fn build_layout(self) -> GfxResult<Arc<DescriptorSetLayout>> {
        self.cache.get_or_create(&self.bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DescriptorPoolConfig;
    use crate::device::{GraphicsDevice, RawHandle, ResourceKind, SoftwareDevice};
    use crate::error::GfxError;

    struct Fixture {
        software: Arc<SoftwareDevice>,
        cache: DescriptorLayoutCache,
        allocator: DescriptorAllocator,
    }

    fn fixture() -> Fixture {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        Fixture {
            cache: DescriptorLayoutCache::new(&device),
            allocator: DescriptorAllocator::new(&device, DescriptorPoolConfig::default(), "t"),
            software,
        }
    }

    #[test]
    fn test_build_writes_every_binding() {
        let mut f = fixture();
        let buffer = BufferHandle::from_raw(0x11);
        let view = ImageViewHandle::from_raw(0x22);
        let (set, layout) = DescriptorBuilder::begin(&f.cache, &mut f.allocator)
            .bind_buffer(
                0,
                buffer,
                0,
                64,
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )
            .bind_image(
                1,
                view,
                ImageLayout::ShaderReadOnly,
                DescriptorType::CombinedImageSampler,
                ShaderStages::FRAGMENT,
            )
            .build()
            .unwrap();

        assert_eq!(layout.bindings().len(), 2);
        assert_eq!(
            f.software.descriptor_resource(set.handle(), 0),
            Some(DescriptorResource::Buffer {
                buffer,
                offset: 0,
                range: 64
            })
        );
        assert_eq!(
            f.software.descriptor_resource(set.handle(), 1),
            Some(DescriptorResource::Image {
                view,
                layout: ImageLayout::ShaderReadOnly
            })
        );
    }

    #[test]
    fn test_same_shape_reuses_the_cached_layout() {
        let mut f = fixture();
        let build = |f: &mut Fixture, raw: u64| {
            DescriptorBuilder::begin(&f.cache, &mut f.allocator)
                .bind_buffer(
                    0,
                    BufferHandle::from_raw(raw),
                    0,
                    16,
                    DescriptorType::StorageBuffer,
                    ShaderStages::COMPUTE,
                )
                .build()
                .unwrap()
        };
        let (set_a, layout_a) = build(&mut f, 1);
        let (set_b, layout_b) = build(&mut f, 2);
        assert!(Arc::ptr_eq(&layout_a, &layout_b));
        assert_ne!(set_a, set_b);
        assert_eq!(f.software.created_count(ResourceKind::DescriptorSetLayout), 1);
    }

    #[test]
    fn test_duplicate_slots_fail_the_build() {
        let mut f = fixture();
        let err = DescriptorBuilder::begin(&f.cache, &mut f.allocator)
            .bind_buffer(
                0,
                BufferHandle::from_raw(1),
                0,
                4,
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )
            .bind_buffer(
                0,
                BufferHandle::from_raw(2),
                0,
                4,
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, GfxError::InvalidParameters(_)));
        assert_eq!(f.allocator.pool_count(), 0);
    }
}

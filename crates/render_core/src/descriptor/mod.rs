//! Descriptor set management
//!
//! Layouts are deduplicated by [`DescriptorLayoutCache`], sets come from a
//! growable [`DescriptorAllocator`], and [`DescriptorBuilder`] ties the two
//! together for the common "bind these resources" case.

mod allocator;
mod builder;
mod layout_cache;

pub use allocator::{DescriptorAllocator, DescriptorPoolDesc, DescriptorPoolObject, DescriptorSet};
pub use builder::DescriptorBuilder;
pub use layout_cache::{
    canonical_bindings, DescriptorLayoutCache, DescriptorSetLayout, DescriptorSetLayoutObject,
};

//! Typed raw handles for device objects
//!
//! Every handle is a `Copy` newtype over the `u64` the device hands out.
//! Zero is reserved as the invalid sentinel, which is what a released
//! wrapper reports from `get()`.

use std::fmt;

/// Closed set of device object kinds managed by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Memory-backed linear buffer
    Buffer,
    /// Memory-backed image
    Image,
    /// View over an image
    ImageView,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Descriptor pool
    DescriptorPool,
    /// Descriptor set drawn from a pool
    DescriptorSet,
    /// Command pool tied to one queue family
    CommandPool,
    /// Command buffer drawn from a pool
    CommandBuffer,
    /// Compiled shader module
    ShaderModule,
    /// CPU-GPU fence
    Fence,
    /// GPU-GPU semaphore
    Semaphore,
    /// Presentable swapchain
    Swapchain,
}

impl ResourceKind {
    /// Human readable name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Image => "image",
            Self::ImageView => "image view",
            Self::DescriptorSetLayout => "descriptor set layout",
            Self::DescriptorPool => "descriptor pool",
            Self::DescriptorSet => "descriptor set",
            Self::CommandPool => "command pool",
            Self::CommandBuffer => "command buffer",
            Self::ShaderModule => "shader module",
            Self::Fence => "fence",
            Self::Semaphore => "semaphore",
            Self::Swapchain => "swapchain",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common behaviour of all typed raw handles
pub trait RawHandle: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// The invalid sentinel value
    const NULL: Self;
    /// Kind of object this handle refers to
    const KIND: ResourceKind;

    /// Build a handle from its raw device value
    fn from_raw(raw: u64) -> Self;

    /// Raw device value
    fn as_raw(self) -> u64;

    /// Whether this is the invalid sentinel
    fn is_null(self) -> bool {
        self == Self::NULL
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(u64);

        impl RawHandle for $name {
            const NULL: Self = Self(0);
            const KIND: ResourceKind = ResourceKind::$kind;

            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn as_raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.0 == 0 {
                    write!(f, "{}(null)", stringify!($name))
                } else {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                }
            }
        }
    };
}

define_handle!(
    /// Device buffer
    BufferHandle => Buffer
);
define_handle!(
    /// Device image
    ImageHandle => Image
);
define_handle!(
    /// View over a device image
    ImageViewHandle => ImageView
);
define_handle!(
    /// Descriptor set layout
    DescriptorSetLayoutHandle => DescriptorSetLayout
);
define_handle!(
    /// Descriptor pool
    DescriptorPoolHandle => DescriptorPool
);
define_handle!(
    /// Descriptor set
    DescriptorSetHandle => DescriptorSet
);
define_handle!(
    /// Command pool
    CommandPoolHandle => CommandPool
);
define_handle!(
    /// Command buffer
    CommandBufferHandle => CommandBuffer
);
define_handle!(
    /// Shader module
    ShaderModuleHandle => ShaderModule
);
define_handle!(
    /// Fence
    FenceHandle => Fence
);
define_handle!(
    /// Semaphore
    SemaphoreHandle => Semaphore
);
define_handle!(
    /// Swapchain
    SwapchainHandle => Swapchain
);

/// Memory allocation backing a buffer or image.
///
/// Allocations are not device objects in their own right; they travel with
/// the buffer or image they back and are released together with it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocationHandle(u64);

impl AllocationHandle {
    /// Invalid allocation
    pub const NULL: Self = Self(0);

    /// Build from the raw allocator value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw allocator value
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for AllocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AllocationHandle({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles_are_detected() {
        assert!(BufferHandle::NULL.is_null());
        assert!(!BufferHandle::from_raw(7).is_null());
        assert_eq!(ImageHandle::KIND, ResourceKind::Image);
    }

    #[test]
    fn test_debug_output_marks_null() {
        assert_eq!(format!("{:?}", FenceHandle::NULL), "FenceHandle(null)");
        assert_eq!(format!("{:?}", FenceHandle::from_raw(0x10)), "FenceHandle(0x10)");
    }
}

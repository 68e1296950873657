//! Memory-backed resources
//!
//! Buffers and images wrap a device object plus its allocation and hand
//! their teardown to a [`DeletionQueue`](crate::deletion_queue::DeletionQueue)
//! the moment they are created.

mod buffer;
mod image;

pub use buffer::{AllocatedBuffer, Buffer, BufferDesc, BufferObject};
pub use image::{AllocatedImage, Image, ImageDesc, ImageObject, ImageView, ImageViewObject};

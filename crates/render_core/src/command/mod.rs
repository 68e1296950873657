//! Command buffer management
//!
//! Pools are tied to one queue family. Besides regular per-frame recording,
//! [`CommandPool`] offers the synchronous one-shot pattern used for
//! setup-time transfers.

mod buffer;
mod pool;

pub use buffer::CommandBuffer;
pub use pool::{CommandPool, CommandPoolObject, DEFAULT_SUBMIT_TIMEOUT_NS};

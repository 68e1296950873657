//! Error types for device operations
//!
//! Render target invalidation is deliberately absent here: an out-of-date
//! swapchain is an expected outcome and is reported through
//! [`PrepareOutcome`](crate::frame::PrepareOutcome) and
//! [`SubmitOutcome`](crate::frame::SubmitOutcome) instead.

use thiserror::Error;

use crate::device::ResourceKind;

/// Errors produced by the device collaborator and the wrappers above it
#[derive(Error, Debug)]
pub enum GfxError {
    /// The memory allocator could not satisfy a request
    #[error("Out of device memory: requested {requested} bytes, {available} available")]
    OutOfDeviceMemory {
        /// Bytes requested
        requested: u64,
        /// Bytes still available in the budget
        available: u64,
    },

    /// Creation parameters were rejected
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Host mapping failed
    #[error("Memory mapping failed: {0}")]
    MapFailed(String),

    /// A descriptor pool has no room left for the requested set
    #[error("Descriptor pool out of memory")]
    OutOfPoolMemory,

    /// The device stopped responding; unrecoverable within the process
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// A fence or acquire wait expired
    #[error("Wait timed out after {waited_ns} ns")]
    Timeout {
        /// Timeout that expired
        waited_ns: u64,
    },

    /// Shader bytecode could not be located or read
    #[error("Failed to load shader {path}: {reason}")]
    ShaderLoad {
        /// Requested path
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// Shader bytecode is not valid SPIR-V
    #[error("Invalid shader code: {0}")]
    InvalidShaderCode(String),

    /// The device does not know this handle
    #[error("Unknown {kind} handle {raw:#x}")]
    UnknownHandle {
        /// Kind of object
        kind: ResourceKind,
        /// Raw handle value
        raw: u64,
    },
}

impl GfxError {
    /// Whether this error reports exhausted memory (device memory or pool)
    pub const fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::OutOfDeviceMemory { .. } | Self::OutOfPoolMemory)
    }

    /// Whether the process cannot continue rendering after this error
    pub const fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_) | Self::Timeout { .. })
    }
}

/// Result type for device operations
pub type GfxResult<T> = Result<T, GfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(GfxError::OutOfPoolMemory.is_allocation_failure());
        assert!(GfxError::Timeout { waited_ns: 5 }.is_device_lost());
        assert!(!GfxError::InvalidParameters("x".into()).is_device_lost());
    }

    #[test]
    fn test_messages_name_the_handle_kind() {
        let err = GfxError::UnknownHandle {
            kind: ResourceKind::Fence,
            raw: 0x2a,
        };
        assert_eq!(err.to_string(), "Unknown fence handle 0x2a");
    }
}

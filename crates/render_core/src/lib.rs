//! # Render Core
//!
//! GPU resource lifecycle and frame orchestration for a real-time 3D engine.
//!
//! - **Resource handles**: every device object is owned by a
//!   [`ResourceHandle`](handle::ResourceHandle) that is released exactly once
//! - **Deferred deletion**: teardown is queued and run in reverse order once
//!   the GPU can no longer reference the object
//! - **Descriptors**: deduplicated layouts, growable pools and a builder
//! - **Frame orchestration**: [`RenderContext`](frame::RenderContext) drives
//!   prepare/record/submit and owns every deletion queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), GfxError> {
//!     let device = Arc::new(SoftwareDevice::new());
//!     let surface = HeadlessSurface::new(1280, 720);
//!     let mut ctx = RenderContext::new(device, Box::new(surface), RenderConfig::default())?;
//!
//!     loop {
//!         match ctx.prepare_frame()? {
//!             PrepareOutcome::Ready(_) => {}
//!             PrepareOutcome::OutOfDate => {
//!                 ctx.recreate_target()?;
//!                 continue;
//!             }
//!         }
//!         let image = ctx.frame_image();
//!         ctx.commands().cmd_clear_color_image(image, [0.2, 0.3, 0.8, 1.0]);
//!         if ctx.submit_frame()? == SubmitOutcome::OutOfDate {
//!             ctx.recreate_target()?;
//!         }
//!         # break;
//!     }
//!     ctx.shutdown()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod command;
pub mod config;
pub mod deletion_queue;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod handle;
pub mod logging;
pub mod resources;
pub mod shader;
pub mod sync;

pub use error::{GfxError, GfxResult};

/// Common imports for users of the crate
pub mod prelude {
    pub use crate::{
        command::{CommandBuffer, CommandPool},
        config::{Config, DescriptorPoolConfig, LoggingConfig, RenderConfig},
        deletion_queue::DeletionQueue,
        descriptor::{DescriptorAllocator, DescriptorBuilder, DescriptorLayoutCache, DescriptorSet},
        device::{
            BufferUsage, DescriptorType, Extent2D, GraphicsDevice, ImageFormat, ImageLayout,
            ImageUsage, MemoryLocation, ResourceKind, ShaderStages, SoftwareDevice,
            SoftwareDeviceConfig,
        },
        error::{GfxError, GfxResult},
        frame::{
            FrameInfo, FrameState, HeadlessSurface, PrepareOutcome, RenderContext, RenderSurface,
            SubmitOutcome,
        },
        handle::{DeviceObject, ResourceHandle},
        resources::{Buffer, BufferDesc, Image, ImageDesc},
        shader::{ShaderLibrary, ShaderModule},
    };
}

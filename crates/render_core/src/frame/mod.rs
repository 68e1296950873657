//! Frame orchestration
//!
//! [`RenderContext`] is the single owner of per-frame state. Applications
//! call [`RenderContext::prepare_frame`], record into
//! [`RenderContext::commands`], then [`RenderContext::submit_frame`].

mod context;
mod slot;
mod surface;
mod swapchain;

pub use context::{FrameInfo, FrameState, PrepareOutcome, RenderContext, SubmitOutcome};
pub use slot::FrameSlot;
pub use surface::{HeadlessSurface, RenderSurface};
pub use swapchain::{Swapchain, SwapchainObject};

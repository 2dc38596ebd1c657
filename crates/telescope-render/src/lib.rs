// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic Vulkan lifecycle and frame loop.
//!
//! Everything GPU-facing goes through [`GpuBackend`]; the real implementation
//! lives in `telescope-vk`. [`GraphicsContext`] owns every per-device and
//! per-swapchain resource and drives the acquire → record → submit → present
//! cycle once per displayed frame.
#![deny(unsafe_op_in_unsafe_fn)]

mod backend;
mod commands;
mod context;
mod depth;
mod device;
mod error;
mod render_pass;
mod swapchain;
mod sync;
mod teardown;

#[cfg(test)]
mod mock;

pub use backend::GpuBackend;
pub use commands::{CommandResources, FrameRecorder};
pub use context::{FrameCursor, FrameEnd, FrameStart, GraphicsConfig, GraphicsContext};
pub use depth::{find_memory_type, select_depth_format, DepthResource, DEPTH_FORMAT_CANDIDATES};
pub use device::{select_physical_device, select_queue_families, DeviceContext, QueueFamilies};
pub use error::{ErrorKind, GfxError, GfxResult};
pub use render_pass::{FramebufferSet, RenderPass};
pub use swapchain::{choose_extent, choose_image_count, select_surface_format, SwapchainState};
pub use sync::{FrameSyncSet, SlotState};

pub use ash::vk;

/// Drawable size of the window in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero dimension; nothing can be presented.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for RenderSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl From<vk::Extent2D> for RenderSize {
    fn from(e: vk::Extent2D) -> Self {
        Self {
            width: e.width,
            height: e.height,
        }
    }
}

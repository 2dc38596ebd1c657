// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

pub type GfxResult<T> = Result<T, GfxError>;

/// Coarse classification used by callers to decide between retry and restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// No device, queue family or format satisfies the requirements.
    Configuration,
    /// A GPU object could not be created.
    ResourceCreation,
    /// The surface no longer matches the swapchain; fixed by recreation.
    OutOfDateSurface,
    /// A bounded wait expired.
    SynchronizationTimeout,
    /// A steady-state device call failed (submit, present, device lost).
    Device,
    /// The caller drove the frame loop out of order.
    Usage,
}

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(String),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("no Vulkan physical device available")]
    NoPhysicalDevice,

    #[error("no queue family supports graphics")]
    NoGraphicsQueue,

    #[error("no queue family can present to the surface")]
    NoPresentQueue,

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("no depth format supports optimal-tiling depth/stencil attachments")]
    NoDepthFormat,

    #[error("failed to create {object}: {result}")]
    ResourceCreation {
        object: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("no memory type in mask {type_bits:#x} has {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("surface is out of date")]
    OutOfDateSurface,

    #[error("timed out waiting for {what}")]
    SynchronizationTimeout { what: &'static str },

    #[error("{op} failed: {result}")]
    Device {
        op: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("frame loop misuse: {0}")]
    FrameOrder(String),
}

impl GfxError {
    pub(crate) fn creation(object: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { object, result }
    }

    pub(crate) fn device(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Device { op, result }
    }

    /// Maps a wait result, turning `TIMEOUT`/`NOT_READY` into a timeout error.
    pub(crate) fn wait(what: &'static str, op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::SynchronizationTimeout { what },
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDateSurface,
            result => Self::Device { op, result },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Loader(_)
            | Self::WindowHandle(_)
            | Self::NoPhysicalDevice
            | Self::NoGraphicsQueue
            | Self::NoPresentQueue
            | Self::NoSurfaceFormat
            | Self::NoDepthFormat => ErrorKind::Configuration,
            Self::ResourceCreation { .. } | Self::NoSuitableMemoryType { .. } => {
                ErrorKind::ResourceCreation
            }
            Self::OutOfDateSurface => ErrorKind::OutOfDateSurface,
            Self::SynchronizationTimeout { .. } => ErrorKind::SynchronizationTimeout,
            Self::Device { .. } => ErrorKind::Device,
            Self::FrameOrder(_) => ErrorKind::Usage,
        }
    }

    /// Everything except a stale surface ends the render loop. The caller
    /// restarts with `shutdown` + `init`.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::OutOfDateSurface
    }
}

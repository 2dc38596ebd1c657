// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::{DepthResource, GpuBackend};

/// One owned resource, ready to be released.
#[derive(Debug)]
pub(crate) enum Teardown {
    Instance,
    Surface,
    Device,
    Swapchain(vk::SwapchainKHR),
    ImageViews(Vec<vk::ImageView>),
    Depth(DepthResource),
    RenderPass(vk::RenderPass),
    Framebuffers(Vec<vk::Framebuffer>),
    CommandPool(vk::CommandPool),
    CommandBuffers {
        pool: vk::CommandPool,
        buffers: Vec<vk::CommandBuffer>,
    },
    Semaphores(Vec<vk::Semaphore>),
    Fences(Vec<vk::Fence>),
}

impl Teardown {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Surface => "surface",
            Self::Device => "device",
            Self::Swapchain(_) => "swapchain",
            Self::ImageViews(_) => "image views",
            Self::Depth(_) => "depth resources",
            Self::RenderPass(_) => "render pass",
            Self::Framebuffers(_) => "framebuffers",
            Self::CommandPool(_) => "command pool",
            Self::CommandBuffers { .. } => "command buffers",
            Self::Semaphores(_) => "semaphores",
            Self::Fences(_) => "fences",
        }
    }

    /// Releases the resource. Lists go last-created first; null handles left
    /// behind by an interrupted recreation are skipped.
    pub fn release<B: GpuBackend>(self, gpu: &mut B) {
        match self {
            Self::Instance => gpu.destroy_instance(),
            Self::Surface => gpu.destroy_surface(),
            Self::Device => gpu.destroy_device(),
            Self::Swapchain(sc) => {
                if sc != vk::SwapchainKHR::null() {
                    gpu.destroy_swapchain(sc);
                }
            }
            Self::ImageViews(views) => {
                for view in views.into_iter().rev() {
                    gpu.destroy_image_view(view);
                }
            }
            Self::Depth(depth) => {
                if depth.view != vk::ImageView::null() {
                    gpu.destroy_image_view(depth.view);
                }
                if depth.memory != vk::DeviceMemory::null() {
                    gpu.free_memory(depth.memory);
                }
                if depth.image != vk::Image::null() {
                    gpu.destroy_image(depth.image);
                }
            }
            Self::RenderPass(rp) => {
                if rp != vk::RenderPass::null() {
                    gpu.destroy_render_pass(rp);
                }
            }
            Self::Framebuffers(fbs) => {
                for fb in fbs.into_iter().rev() {
                    gpu.destroy_framebuffer(fb);
                }
            }
            Self::CommandPool(pool) => {
                if pool != vk::CommandPool::null() {
                    gpu.destroy_command_pool(pool);
                }
            }
            Self::CommandBuffers { pool, buffers } => {
                if !buffers.is_empty() {
                    gpu.free_command_buffers(pool, &buffers);
                }
            }
            Self::Semaphores(sems) => {
                for s in sems.into_iter().rev() {
                    if s != vk::Semaphore::null() {
                        gpu.destroy_semaphore(s);
                    }
                }
            }
            Self::Fences(fences) => {
                for f in fences.into_iter().rev() {
                    gpu.destroy_fence(f);
                }
            }
        }
    }
}

/// Resources in creation order; unwinding releases them in exact reverse.
#[derive(Debug, Default)]
pub(crate) struct TeardownStack {
    entries: Vec<Teardown>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Teardown) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Forget every entry; ownership has moved elsewhere.
    pub fn disarm(mut self) {
        self.entries.clear();
    }

    pub fn unwind<B: GpuBackend>(mut self, gpu: &mut B) {
        while let Some(entry) = self.entries.pop() {
            debug!("vk: release {}", entry.label());
            entry.release(gpu);
        }
    }
}

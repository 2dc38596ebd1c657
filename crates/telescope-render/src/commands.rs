// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::{GfxError, GfxResult, GpuBackend};

/// Command pool on the graphics family plus one primary buffer per swapchain
/// image, indexed like the images.
#[derive(Clone, Debug, Default)]
pub struct CommandResources {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl CommandResources {
    /// Pool is reset-capable and transient: buffers are re-recorded every frame.
    pub fn create_pool<B: GpuBackend>(gpu: &mut B, graphics_family: u32) -> GfxResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );
        gpu.create_command_pool(&info)
            .map_err(GfxError::creation("command pool"))
    }

    pub fn allocate<B: GpuBackend>(
        gpu: &mut B,
        pool: vk::CommandPool,
        count: usize,
    ) -> GfxResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let buffers = gpu
            .allocate_command_buffers(&info)
            .map_err(GfxError::creation("command buffers"))?;
        debug!("vk: {} command buffers", buffers.len());
        Ok(buffers)
    }

    /// Frees the current buffers and allocates `count` new ones from the same pool.
    pub fn reallocate<B: GpuBackend>(&mut self, gpu: &mut B, count: usize) -> GfxResult<()> {
        if !self.buffers.is_empty() {
            gpu.free_command_buffers(self.pool, &self.buffers);
            self.buffers.clear();
        }
        self.buffers = Self::allocate(gpu, self.pool, count)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Handed to the draw callback between render pass begin and end.
pub struct FrameRecorder<'a, B> {
    gpu: &'a mut B,
    command_buffer: vk::CommandBuffer,
    extent: vk::Extent2D,
    image_index: u32,
}

impl<'a, B: GpuBackend> FrameRecorder<'a, B> {
    /// Backend access for recording draw commands.
    pub fn gpu(&mut self) -> &mut B {
        self.gpu
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }
}

pub(crate) struct RecordTarget {
    pub cmd: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub image_index: u32,
}

pub(crate) fn clear_values(rgba: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// reset → begin → render pass begin → draw → render pass end → end.
pub(crate) fn record<B, F>(
    gpu: &mut B,
    target: &RecordTarget,
    clear_color: [f32; 4],
    draw: F,
) -> GfxResult<()>
where
    B: GpuBackend,
    F: FnOnce(&mut FrameRecorder<'_, B>),
{
    let cmd = target.cmd;
    gpu.reset_command_buffer(cmd)
        .map_err(GfxError::device("reset_command_buffer"))?;

    let begin = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
    gpu.begin_command_buffer(cmd, &begin)
        .map_err(GfxError::device("begin_command_buffer"))?;

    let clears = clear_values(clear_color);
    let rp_begin = vk::RenderPassBeginInfo::default()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        })
        .clear_values(&clears);
    gpu.cmd_begin_render_pass(cmd, &rp_begin);

    let mut recorder = FrameRecorder {
        gpu: &mut *gpu,
        command_buffer: cmd,
        extent: target.extent,
        image_index: target.image_index,
    };
    draw(&mut recorder);

    gpu.cmd_end_render_pass(cmd);
    gpu.end_command_buffer(cmd)
        .map_err(GfxError::device("end_command_buffer"))
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::{GfxError, GfxResult, GpuBackend};

/// Color + depth render pass with a single subpass. Immutable once created.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

/// One framebuffer per swapchain image view, all sharing the depth view.
#[derive(Clone, Debug, Default)]
pub struct FramebufferSet {
    pub framebuffers: Vec<vk::Framebuffer>,
}

pub(crate) fn attachments(
    color_format: vk::Format,
    depth_format: vk::Format,
) -> [vk::AttachmentDescription; 2] {
    [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ]
}

/// Orders the previous presentation of the image before this pass writes color.
pub(crate) fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::MEMORY_READ,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::BY_REGION,
    }
}

impl RenderPass {
    pub fn create<B: GpuBackend>(
        gpu: &mut B,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GfxResult<Self> {
        let attachments = attachments(color_format, depth_format);
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref)];
        let dependencies = [external_dependency()];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = gpu
            .create_render_pass(&info)
            .map_err(GfxError::creation("render pass"))?;
        debug!("vk: render pass (color {color_format:?}, depth {depth_format:?})");
        Ok(Self {
            handle,
            color_format,
            depth_format,
        })
    }
}

impl FramebufferSet {
    /// Binds each color view together with the shared depth view.
    pub fn create<B: GpuBackend>(
        gpu: &mut B,
        render_pass: &RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> GfxResult<Self> {
        let mut framebuffers = Vec::with_capacity(color_views.len());
        for &view in color_views {
            let attachments = [view, depth_view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            match gpu.create_framebuffer(&info) {
                Ok(fb) => framebuffers.push(fb),
                Err(result) => {
                    for &fb in framebuffers.iter().rev() {
                        gpu.destroy_framebuffer(fb);
                    }
                    return Err(GfxError::ResourceCreation {
                        object: "framebuffer",
                        result,
                    });
                }
            }
        }
        debug!("vk: {} framebuffers", framebuffers.len());
        Ok(Self { framebuffers })
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

// SPDX-License-Identifier: CEPL-1.0
use std::mem;

use ash::vk;
use serde::Deserialize;
use tracing::{info, warn};

use crate::commands::{self, RecordTarget};
use crate::teardown::{Teardown, TeardownStack};
use crate::{
    select_depth_format, CommandResources, DepthResource, DeviceContext, FrameRecorder,
    FrameSyncSet, FramebufferSet, GfxError, GfxResult, GpuBackend, RenderPass, RenderSize,
    SlotState, SwapchainState,
};

/// Frame loop knobs. Every field has a default, so a partial TOML table works.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Color used by [`GraphicsContext::render_frame`].
    pub clear_color: [f32; 4],
    /// Bound on waiting for a swapchain image; `None` waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Bound on waiting for an image's in-flight fence; `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            acquire_timeout_ms: None,
            fence_timeout_ms: None,
        }
    }
}

fn timeout_ns(ms: Option<u64>) -> u64 {
    ms.map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
}

fn per_image<T: Copy>(list: &[T], i: usize, what: &str) -> GfxResult<T> {
    list.get(i)
        .copied()
        .ok_or_else(|| GfxError::FrameOrder(format!("image {i} has no {what}")))
}

/// The swapchain image acquired for the current frame. Valid only until
/// [`GraphicsContext::end_frame`] consumes it or the swapchain is rebuilt.
#[derive(Debug)]
pub struct FrameCursor {
    image_index: u32,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    generation: u64,
}

impl FrameCursor {
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }
}

#[derive(Debug)]
pub enum FrameStart {
    Ready(FrameCursor),
    /// The surface went out of date; the swapchain was rebuilt and this frame
    /// is skipped.
    SwapchainRebuilt,
    /// The drawable area is zero-sized; nothing to render until the next resize.
    Suspended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEnd {
    Presented,
    /// Presented (or attempted), then rebuilt because the surface was stale.
    SwapchainRebuilt,
}

/// Owns every device- and swapchain-scoped resource and drives the frame loop.
///
/// Creation order: instance, surface, device, swapchain, image views, depth,
/// render pass, framebuffers, command pool, command buffers, semaphores,
/// fences. Teardown is the exact reverse, whether through [`shutdown`], drop,
/// or a failed [`init`].
///
/// [`shutdown`]: GraphicsContext::shutdown
/// [`init`]: GraphicsContext::init
pub struct GraphicsContext<B: GpuBackend> {
    gpu: B,
    config: GraphicsConfig,

    surface: vk::SurfaceKHR,
    device: DeviceContext,

    swapchain: SwapchainState,
    depth: DepthResource,
    render_pass: RenderPass,
    framebuffers: FramebufferSet,
    commands: CommandResources,
    sync: FrameSyncSet,

    drawable: RenderSize,
    generation: u64,
    suspended: bool,
    /// Set from the start of a rebuild until it completes, so a failed
    /// rebuild is retried by the next `begin_frame`.
    rebuild_pending: bool,
    released: bool,
}

struct Built {
    surface: vk::SurfaceKHR,
    device: DeviceContext,
    swapchain: SwapchainState,
    depth: DepthResource,
    render_pass: RenderPass,
    framebuffers: FramebufferSet,
    commands: CommandResources,
    sync: FrameSyncSet,
}

fn build<B: GpuBackend>(
    gpu: &mut B,
    stack: &mut TeardownStack,
    drawable: RenderSize,
) -> GfxResult<Built> {
    gpu.create_instance()
        .map_err(GfxError::creation("instance"))?;
    stack.push(Teardown::Instance);

    let surface = gpu
        .create_surface()
        .map_err(GfxError::creation("surface"))?;
    stack.push(Teardown::Surface);

    let device = DeviceContext::create(gpu)?;
    stack.push(Teardown::Device);

    let swapchain = SwapchainState::create(gpu, &device, surface, drawable)?;
    stack.push(Teardown::Swapchain(swapchain.handle));
    stack.push(Teardown::ImageViews(swapchain.views.clone()));

    let depth_format = select_depth_format(|f| gpu.format_properties(device.physical, f))?;
    let depth = DepthResource::create(gpu, device.physical, swapchain.extent, depth_format)?;
    stack.push(Teardown::Depth(depth));

    let render_pass = RenderPass::create(gpu, swapchain.format.format, depth_format)?;
    stack.push(Teardown::RenderPass(render_pass.handle));

    let framebuffers = FramebufferSet::create(
        gpu,
        &render_pass,
        &swapchain.views,
        depth.view,
        swapchain.extent,
    )?;
    stack.push(Teardown::Framebuffers(framebuffers.framebuffers.clone()));

    let image_count = swapchain.image_count();
    let pool = CommandResources::create_pool(gpu, device.families.graphics)?;
    stack.push(Teardown::CommandPool(pool));
    let buffers = CommandResources::allocate(gpu, pool, image_count)?;
    stack.push(Teardown::CommandBuffers {
        pool,
        buffers: buffers.clone(),
    });

    let semaphores = FrameSyncSet::create_semaphores(gpu)?;
    stack.push(Teardown::Semaphores(semaphores.to_vec()));
    let fences = FrameSyncSet::create_fences(gpu, image_count)?;
    stack.push(Teardown::Fences(fences.clone()));

    Ok(Built {
        surface,
        device,
        swapchain,
        depth,
        render_pass,
        framebuffers,
        commands: CommandResources { pool, buffers },
        sync: FrameSyncSet::new(semaphores, fences),
    })
}

impl<B: GpuBackend> GraphicsContext<B> {
    /// Brings up device, swapchain, depth, render pass, framebuffers, commands
    /// and sync objects in that order. On failure everything created so far is
    /// released in reverse before the error is returned.
    pub fn init(mut gpu: B, drawable: RenderSize, config: GraphicsConfig) -> GfxResult<Self> {
        let mut stack = TeardownStack::new();
        let built = match build(&mut gpu, &mut stack, drawable) {
            Ok(built) => built,
            Err(e) => {
                warn!("vk: init failed: {e}; releasing {} resources", stack.len());
                stack.unwind(&mut gpu);
                return Err(e);
            }
        };
        stack.disarm();

        let ctx = Self {
            gpu,
            config,
            surface: built.surface,
            device: built.device,
            swapchain: built.swapchain,
            depth: built.depth,
            render_pass: built.render_pass,
            framebuffers: built.framebuffers,
            commands: built.commands,
            sync: built.sync,
            drawable,
            generation: 0,
            suspended: drawable.is_empty(),
            rebuild_pending: false,
            released: false,
        };
        ctx.check_per_image_counts();
        info!(
            "vk: graphics ready ({}x{}, {} images)",
            ctx.swapchain.extent.width,
            ctx.swapchain.extent.height,
            ctx.swapchain.image_count()
        );
        Ok(ctx)
    }

    /// Acquires the next image and waits until its previous submission has
    /// retired. A stale surface is rebuilt here and reported as
    /// [`FrameStart::SwapchainRebuilt`] instead of an error.
    pub fn begin_frame(&mut self) -> GfxResult<FrameStart> {
        if self.suspended {
            return Ok(FrameStart::Suspended);
        }
        if self.rebuild_pending {
            self.recreate(self.drawable)?;
        }

        let acquired = self.gpu.acquire_next_image(
            self.swapchain.handle,
            timeout_ns(self.config.acquire_timeout_ms),
            self.sync.image_available,
        );
        let (image_index, suboptimal) = match acquired {
            Ok(pair) => pair,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                info!("vk: acquire reported an out-of-date surface; rebuilding");
                self.recreate(self.drawable)?;
                return Ok(FrameStart::SwapchainRebuilt);
            }
            Err(e) => return Err(GfxError::wait("swapchain image", "acquire_next_image")(e)),
        };
        if suboptimal {
            warn!("vk: suboptimal swapchain; rebuilding after present");
            self.rebuild_pending = true;
        }

        let i = image_index as usize;
        let fence = per_image(&self.sync.fences, i, "fence")?;
        let command_buffer = per_image(&self.commands.buffers, i, "command buffer")?;
        let image = per_image(&self.swapchain.images, i, "swapchain image")?;
        self.sync.advance(i, SlotState::Acquired)?;

        self.gpu
            .wait_for_fence(fence, timeout_ns(self.config.fence_timeout_ms))
            .map_err(GfxError::wait("in-flight fence", "wait_for_fences"))?;
        self.gpu
            .reset_fence(fence)
            .map_err(GfxError::device("reset_fences"))?;

        Ok(FrameStart::Ready(FrameCursor {
            image_index,
            command_buffer,
            image,
            generation: self.generation,
        }))
    }

    /// Re-records the cursor's command buffer around `draw` and submits it.
    pub fn record_frame<F>(
        &mut self,
        cursor: &FrameCursor,
        clear_color: [f32; 4],
        draw: F,
    ) -> GfxResult<()>
    where
        F: FnOnce(&mut FrameRecorder<'_, B>),
    {
        self.check_cursor(cursor)?;
        let i = cursor.image_index as usize;
        let framebuffer = per_image(&self.framebuffers.framebuffers, i, "framebuffer")?;
        let fence = per_image(&self.sync.fences, i, "fence")?;
        self.sync.advance(i, SlotState::Recording)?;

        let target = RecordTarget {
            cmd: cursor.command_buffer,
            render_pass: self.render_pass.handle,
            framebuffer,
            extent: self.swapchain.extent,
            image_index: cursor.image_index,
        };
        commands::record(&mut self.gpu, &target, clear_color, draw)?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [cursor.command_buffer];
        let signal_semaphores = [self.sync.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        self.gpu
            .queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&submit),
                fence,
            )
            .map_err(GfxError::device("queue_submit"))?;

        self.sync.advance(i, SlotState::Submitted)
    }

    /// Presents the cursor's image, then waits for the present queue to drain.
    pub fn end_frame(&mut self, cursor: FrameCursor) -> GfxResult<FrameEnd> {
        self.check_cursor(&cursor)?;
        let i = cursor.image_index as usize;
        if self.sync.slots.get(i) != Some(&SlotState::Submitted) {
            return Err(GfxError::FrameOrder(format!(
                "image {i} presented before it was submitted"
            )));
        }

        let wait_semaphores = [self.sync.render_finished];
        let swapchains = [self.swapchain.handle];
        let image_indices = [cursor.image_index];
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let stale = match self.gpu.queue_present(self.device.present_queue, &present) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(result) => return Err(GfxError::Device { op: "queue_present", result }),
        };
        self.sync.advance(i, SlotState::Presented)?;

        self.gpu
            .queue_wait_idle(self.device.present_queue)
            .map_err(GfxError::device("queue_wait_idle"))?;
        self.sync.advance(i, SlotState::Idle)?;

        if stale || self.rebuild_pending {
            info!("vk: present reported a stale surface; rebuilding");
            self.recreate(self.drawable)?;
            return Ok(FrameEnd::SwapchainRebuilt);
        }
        Ok(FrameEnd::Presented)
    }

    /// One full acquire → record → submit → present cycle with the configured
    /// clear color. Returns whether an image was presented.
    pub fn render_frame<F>(&mut self, draw: F) -> GfxResult<bool>
    where
        F: FnOnce(&mut FrameRecorder<'_, B>),
    {
        let cursor = match self.begin_frame()? {
            FrameStart::Ready(cursor) => cursor,
            FrameStart::SwapchainRebuilt | FrameStart::Suspended => return Ok(false),
        };
        let clear = self.config.clear_color;
        self.record_frame(&cursor, clear, draw)?;
        Ok(self.end_frame(cursor)? == FrameEnd::Presented)
    }

    /// Rebuilds the swapchain generation for a new drawable size. A zero-sized
    /// drawable suspends rendering instead.
    pub fn resize(&mut self, size: RenderSize) -> GfxResult<()> {
        self.drawable = size;
        if size.is_empty() {
            if !self.suspended {
                info!("vk: resize to {}x{} → suspended", size.width, size.height);
            }
            self.suspended = true;
            return Ok(());
        }
        if self.suspended {
            info!("vk: resize to {}x{} → resumed", size.width, size.height);
        }
        self.suspended = false;
        self.recreate(size)
    }

    /// Waits for idle, releases framebuffers → depth → views → swapchain, then
    /// rebuilds them in the opposite order. Per-image command buffers and fences
    /// follow the new image count.
    ///
    /// Every constructor cleans up after itself, so a failed rebuild leaves
    /// only empty or null slots behind; the pending flag stays set and the
    /// next attempt starts from whatever survived.
    fn recreate(&mut self, size: RenderSize) -> GfxResult<()> {
        self.rebuild_pending = true;
        self.gpu
            .device_wait_idle()
            .map_err(GfxError::device("device_wait_idle"))?;

        let gpu = &mut self.gpu;
        Teardown::Framebuffers(mem::take(&mut self.framebuffers.framebuffers)).release(gpu);
        Teardown::Depth(mem::take(&mut self.depth)).release(gpu);
        Teardown::ImageViews(mem::take(&mut self.swapchain.views)).release(gpu);
        Teardown::Swapchain(mem::take(&mut self.swapchain.handle)).release(gpu);
        self.swapchain.images.clear();

        self.generation += 1;

        self.swapchain = SwapchainState::create(&mut self.gpu, &self.device, self.surface, size)?;

        if self.swapchain.format.format != self.render_pass.color_format
            || self.render_pass.handle == vk::RenderPass::null()
        {
            info!(
                "vk: surface format changed {:?} → {:?}; new render pass",
                self.render_pass.color_format, self.swapchain.format.format
            );
            let depth_format = self.render_pass.depth_format;
            Teardown::RenderPass(mem::take(&mut self.render_pass.handle)).release(&mut self.gpu);
            self.render_pass =
                RenderPass::create(&mut self.gpu, self.swapchain.format.format, depth_format)?;
        }

        self.depth = DepthResource::create(
            &mut self.gpu,
            self.device.physical,
            self.swapchain.extent,
            self.render_pass.depth_format,
        )?;
        self.framebuffers = FramebufferSet::create(
            &mut self.gpu,
            &self.render_pass,
            &self.swapchain.views,
            self.depth.view,
            self.swapchain.extent,
        )?;

        let count = self.swapchain.image_count();
        if count != self.commands.len() {
            info!(
                "vk: image count {} → {}; resizing per-image resources",
                self.commands.len(),
                count
            );
            self.commands.reallocate(&mut self.gpu, count)?;
        }
        // A slot left mid-frame has a reset fence that nothing will signal.
        let interrupted = self.sync.slots.iter().any(|s| *s != SlotState::Idle);
        if count != self.sync.len() || interrupted {
            self.sync.recreate_fences(&mut self.gpu, count)?;
        } else {
            self.sync.reset_slots();
        }

        self.check_per_image_counts();
        self.rebuild_pending = false;
        info!(
            "vk: swapchain rebuilt ({}x{}, {} images, generation {})",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            count,
            self.generation
        );
        Ok(())
    }

    /// Releases every resource in reverse creation order.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.gpu.device_wait_idle() {
            warn!("vk: device_wait_idle before teardown failed: {e}");
        }

        let pool = self.commands.pool;
        let mut stack = TeardownStack::new();
        stack.push(Teardown::Instance);
        stack.push(Teardown::Surface);
        stack.push(Teardown::Device);
        stack.push(Teardown::Swapchain(mem::take(&mut self.swapchain.handle)));
        stack.push(Teardown::ImageViews(mem::take(&mut self.swapchain.views)));
        stack.push(Teardown::Depth(mem::take(&mut self.depth)));
        stack.push(Teardown::RenderPass(mem::take(&mut self.render_pass.handle)));
        stack.push(Teardown::Framebuffers(mem::take(
            &mut self.framebuffers.framebuffers,
        )));
        stack.push(Teardown::CommandPool(mem::take(&mut self.commands.pool)));
        stack.push(Teardown::CommandBuffers {
            pool,
            buffers: mem::take(&mut self.commands.buffers),
        });
        stack.push(Teardown::Semaphores(vec![
            mem::take(&mut self.sync.image_available),
            mem::take(&mut self.sync.render_finished),
        ]));
        stack.push(Teardown::Fences(mem::take(&mut self.sync.fences)));

        info!("vk: teardown ({} resource groups)", stack.len());
        stack.unwind(&mut self.gpu);
    }

    fn check_cursor(&self, cursor: &FrameCursor) -> GfxResult<()> {
        if cursor.generation != self.generation {
            return Err(GfxError::FrameOrder(format!(
                "cursor from swapchain generation {} used on generation {}",
                cursor.generation, self.generation
            )));
        }
        Ok(())
    }

    fn check_per_image_counts(&self) {
        let n = self.swapchain.image_count();
        debug_assert_eq!(self.swapchain.views.len(), n);
        debug_assert_eq!(self.framebuffers.len(), n);
        debug_assert_eq!(self.commands.len(), n);
        debug_assert_eq!(self.sync.len(), n);
    }

    pub fn gpu(&self) -> &B {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut B {
        &mut self.gpu
    }

    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn swapchain(&self) -> &SwapchainState {
        &self.swapchain
    }

    pub fn depth(&self) -> &DepthResource {
        &self.depth
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn framebuffers(&self) -> &FramebufferSet {
        &self.framebuffers
    }

    pub fn commands(&self) -> &CommandResources {
        &self.commands
    }

    pub fn sync(&self) -> &FrameSyncSet {
        &self.sync
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Incremented every time the swapchain is rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

impl<B: GpuBackend> Drop for GraphicsContext<B> {
    fn drop(&mut self) {
        self.release();
    }
}

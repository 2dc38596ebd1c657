// SPDX-License-Identifier: CEPL-1.0
//! Recording backend for tests. Every create/destroy and every frame-loop call
//! lands in a shared log; submitted work stays "in flight" on a simulated GPU
//! until its fence is waited on, the clock ticks, or the queue goes idle.

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::GpuBackend;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Res {
    Instance,
    Surface,
    Device,
    Swapchain(u64),
    ImageView(u64),
    Image(u64),
    Memory(u64),
    RenderPass(u64),
    Framebuffer(u64),
    CommandPool(u64),
    CommandBuffers(Vec<u64>),
    Semaphore(u64),
    Fence(u64),
}

impl Res {
    pub fn kind(&self) -> &'static str {
        match self {
            Res::Instance => "instance",
            Res::Surface => "surface",
            Res::Device => "device",
            Res::Swapchain(_) => "swapchain",
            Res::ImageView(_) => "view",
            Res::Image(_) => "image",
            Res::Memory(_) => "memory",
            Res::RenderPass(_) => "renderpass",
            Res::Framebuffer(_) => "framebuffer",
            Res::CommandPool(_) => "pool",
            Res::CommandBuffers(_) => "cmdbufs",
            Res::Semaphore(_) => "semaphore",
            Res::Fence(_) => "fence",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create(Res),
    Destroy(Res),
    Acquire { timeout: u64 },
    WaitFence(u64),
    ResetFence(u64),
    ResetCommandBuffer(u64),
    BeginCommandBuffer(u64),
    BeginRenderPass { cmd: u64, framebuffer: u64 },
    EndRenderPass(u64),
    EndCommandBuffer(u64),
    Submit { cmd: u64, fence: u64 },
    Present { image: u32 },
    QueueWaitIdle,
    DeviceWaitIdle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted, GPU work not finished yet.
    Pending,
}

#[derive(Clone, Debug, Default)]
pub struct SwapchainRequest {
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub format: vk::Format,
}

pub struct MockState {
    pub log: Vec<Call>,

    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Queue family properties with their present support.
    pub families: Vec<(vk::QueueFamilyProperties, bool)>,
    pub depth_formats: Vec<vk::Format>,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub memory_type_bits: u32,
    /// Forces the number of images a new swapchain reports.
    pub image_count: Option<u32>,
    /// Fail the n-th (0-based) call of the named creation op.
    pub fail_at: Option<(&'static str, usize)>,
    /// Results to return from the next acquires; `SUBOPTIMAL_KHR` still hands out an image.
    pub acquire_script: VecDeque<vk::Result>,
    pub present_script: VecDeque<vk::Result>,
    /// When false, idle waits do not retire submitted work.
    pub idle_completes_work: bool,

    pub device_queue_families: Vec<u32>,
    pub swapchain_requests: Vec<SwapchainRequest>,
    pub fences: HashMap<u64, FenceState>,
    pub in_flight: Vec<(u64, u64)>,
    pub violations: Vec<String>,

    next_handle: u64,
    next_image: u32,
    images: Vec<vk::Image>,
    created: HashMap<&'static str, usize>,
}

impl Default for MockState {
    fn default() -> Self {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory.memory_types[0].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        memory.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        Self {
            log: Vec::new(),
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            families: vec![(
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                    queue_count: 1,
                    ..Default::default()
                },
                true,
            )],
            depth_formats: vec![vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
            memory,
            memory_type_bits: 0b11,
            image_count: None,
            fail_at: None,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            idle_completes_work: true,
            device_queue_families: Vec::new(),
            swapchain_requests: Vec::new(),
            fences: HashMap::new(),
            in_flight: Vec::new(),
            violations: Vec::new(),
            next_handle: 0x100,
            next_image: 0,
            images: Vec::new(),
            created: HashMap::new(),
        }
    }
}

impl MockState {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn gate(&mut self, op: &'static str) -> VkResult<()> {
        let n = self.created.entry(op).or_insert(0);
        let this = *n;
        *n += 1;
        match self.fail_at {
            Some((fail_op, at)) if fail_op == op && at == this => {
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            }
            _ => Ok(()),
        }
    }

    fn create(&mut self, op: &'static str, res: impl FnOnce(u64) -> Res) -> VkResult<u64> {
        self.gate(op)?;
        let h = self.mint();
        self.log.push(Call::Create(res(h)));
        Ok(h)
    }

    fn retire_fence(&mut self, fence: u64) {
        self.in_flight.retain(|&(_, f)| f != fence);
        self.fences.insert(fence, FenceState::Signaled);
    }

    fn retire_all(&mut self) {
        for (_, f) in std::mem::take(&mut self.in_flight) {
            self.fences.insert(f, FenceState::Signaled);
        }
    }

    /// Creation and destruction events only, in call order.
    pub fn lifecycle(&self) -> (Vec<Res>, Vec<Res>) {
        let mut created = Vec::new();
        let mut destroyed = Vec::new();
        for call in &self.log {
            match call {
                Call::Create(r) => created.push(r.clone()),
                Call::Destroy(r) => destroyed.push(r.clone()),
                _ => {}
            }
        }
        (created, destroyed)
    }

    /// Resources created and not yet destroyed.
    pub fn live(&self) -> Vec<Res> {
        let (created, destroyed) = self.lifecycle();
        created
            .into_iter()
            .filter(|r| !destroyed.contains(r))
            .collect()
    }

    pub fn count_live(&self, kind: &str) -> usize {
        self.live()
            .iter()
            .map(|r| match r {
                Res::CommandBuffers(v) if kind == "cmdbuf" => v.len(),
                r if r.kind() == kind => 1,
                _ => 0,
            })
            .sum()
    }

    pub fn frame_calls(&self) -> Vec<Call> {
        self.log
            .iter()
            .filter(|c| !matches!(c, Call::Create(_) | Call::Destroy(_)))
            .cloned()
            .collect()
    }
}

/// Cloning shares the same state, so a test keeps a handle after moving the
/// backend into a context.
#[derive(Clone, Default)]
pub struct MockGpu {
    state: Rc<RefCell<MockState>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// Finishes the oldest in-flight submission.
    pub fn tick(&self) {
        let mut s = self.state();
        if !s.in_flight.is_empty() {
            let (_, fence) = s.in_flight.remove(0);
            s.fences.insert(fence, FenceState::Signaled);
        }
    }
}

impl GpuBackend for MockGpu {
    fn create_instance(&mut self) -> VkResult<()> {
        self.state().create("instance", |_| Res::Instance).map(|_| ())
    }

    fn create_surface(&mut self) -> VkResult<vk::SurfaceKHR> {
        self.state()
            .create("surface", |_| Res::Surface)
            .map(vk::SurfaceKHR::from_raw)
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        Ok(vec![vk::PhysicalDevice::from_raw(0x42)])
    }

    fn physical_device_name(&self, _phys: vk::PhysicalDevice) -> String {
        "mock gpu".into()
    }

    fn queue_family_properties(&self, _phys: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.state.borrow().families.iter().map(|(p, _)| *p).collect()
    }

    fn surface_support(&self, _phys: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        Ok(self
            .state
            .borrow()
            .families
            .get(family as usize)
            .is_some_and(|(_, present)| *present))
    }

    fn create_device(
        &mut self,
        _phys: vk::PhysicalDevice,
        info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<()> {
        let mut s = self.state();
        s.create("device", |_| Res::Device)?;
        // SAFETY: the create info points at a live slice for the duration of the call.
        let queues = unsafe {
            std::slice::from_raw_parts(
                info.p_queue_create_infos,
                info.queue_create_info_count as usize,
            )
        };
        s.device_queue_families = queues.iter().map(|q| q.queue_family_index).collect();
        Ok(())
    }

    fn device_queue(&self, family: u32, _index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x1000 + family as u64)
    }

    fn destroy_device(&mut self) {
        self.state().log.push(Call::Destroy(Res::Device));
    }

    fn destroy_surface(&mut self) {
        self.state().log.push(Call::Destroy(Res::Surface));
    }

    fn destroy_instance(&mut self) {
        self.state().log.push(Call::Destroy(Res::Instance));
    }

    fn surface_capabilities(&self, _phys: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.borrow().caps)
    }

    fn surface_formats(&self, _phys: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn format_properties(&self, _phys: vk::PhysicalDevice, format: vk::Format) -> vk::FormatProperties {
        let supported = self.state.borrow().depth_formats.contains(&format);
        vk::FormatProperties {
            optimal_tiling_features: if supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    fn memory_properties(&self, _phys: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        self.state.borrow().memory
    }

    fn create_swapchain(&mut self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state();
        let h = s.create("swapchain", Res::Swapchain)?;
        s.swapchain_requests.push(SwapchainRequest {
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            sharing_mode: info.image_sharing_mode,
            queue_family_count: info.queue_family_index_count,
            present_mode: info.present_mode,
            format: info.image_format,
        });
        let count = s.image_count.unwrap_or(info.min_image_count);
        let images = (0..count).map(|_| vk::Image::from_raw(s.mint())).collect();
        s.images = images;
        s.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(h))
    }

    fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        Ok(self.state.borrow().images.clone())
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.state()
            .log
            .push(Call::Destroy(Res::Swapchain(swapchain.as_raw())));
    }

    fn acquire_next_image(
        &mut self,
        _swapchain: vk::SwapchainKHR,
        timeout: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state();
        s.log.push(Call::Acquire { timeout });
        let suboptimal = match s.acquire_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err),
        };
        let count = s.images.len() as u32;
        let index = s.next_image % count;
        s.next_image = s.next_image.wrapping_add(1);
        Ok((index, suboptimal))
    }

    fn queue_present(&mut self, _queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        let mut s = self.state();
        // SAFETY: one swapchain, one index, alive for the call.
        let image = unsafe { *info.p_image_indices };
        s.log.push(Call::Present { image });
        match s.present_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
        }
    }

    fn create_image_view(&mut self, _info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        self.state()
            .create("image_view", Res::ImageView)
            .map(vk::ImageView::from_raw)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.state()
            .log
            .push(Call::Destroy(Res::ImageView(view.as_raw())));
    }

    fn create_image(&mut self, _info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        self.state()
            .create("image", Res::Image)
            .map(vk::Image::from_raw)
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 1 << 20,
            alignment: 256,
            memory_type_bits: self.state.borrow().memory_type_bits,
        }
    }

    fn destroy_image(&mut self, image: vk::Image) {
        self.state()
            .log
            .push(Call::Destroy(Res::Image(image.as_raw())));
    }

    fn allocate_memory(&mut self, _info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        self.state()
            .create("memory", Res::Memory)
            .map(vk::DeviceMemory::from_raw)
    }

    fn bind_image_memory(&mut self, _image: vk::Image, _memory: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        self.state()
            .log
            .push(Call::Destroy(Res::Memory(memory.as_raw())));
    }

    fn create_render_pass(&mut self, _info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        self.state()
            .create("render_pass", Res::RenderPass)
            .map(vk::RenderPass::from_raw)
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.state()
            .log
            .push(Call::Destroy(Res::RenderPass(render_pass.as_raw())));
    }

    fn create_framebuffer(&mut self, _info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        self.state()
            .create("framebuffer", Res::Framebuffer)
            .map(vk::Framebuffer::from_raw)
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.state()
            .log
            .push(Call::Destroy(Res::Framebuffer(framebuffer.as_raw())));
    }

    fn create_command_pool(&mut self, _info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        self.state()
            .create("command_pool", Res::CommandPool)
            .map(vk::CommandPool::from_raw)
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        self.state()
            .log
            .push(Call::Destroy(Res::CommandPool(pool.as_raw())));
    }

    fn allocate_command_buffers(
        &mut self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.state();
        s.gate("command_buffers")?;
        let raw: Vec<u64> = (0..info.command_buffer_count).map(|_| s.mint()).collect();
        s.log.push(Call::Create(Res::CommandBuffers(raw.clone())));
        Ok(raw.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn free_command_buffers(&mut self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let raw = buffers.iter().map(|b| b.as_raw()).collect();
        self.state().log.push(Call::Destroy(Res::CommandBuffers(raw)));
    }

    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state();
        let raw = cmd.as_raw();
        if s.in_flight.iter().any(|&(c, _)| c == raw) {
            s.violations
                .push(format!("command buffer {raw:#x} reset while in flight"));
        }
        s.log.push(Call::ResetCommandBuffer(raw));
        Ok(())
    }

    fn begin_command_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.state().log.push(Call::BeginCommandBuffer(cmd.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.state().log.push(Call::EndCommandBuffer(cmd.as_raw()));
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        self.state().log.push(Call::BeginRenderPass {
            cmd: cmd.as_raw(),
            framebuffer: info.framebuffer.as_raw(),
        });
    }

    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        self.state().log.push(Call::EndRenderPass(cmd.as_raw()));
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        self.state()
            .create("semaphore", Res::Semaphore)
            .map(vk::Semaphore::from_raw)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.state()
            .log
            .push(Call::Destroy(Res::Semaphore(semaphore.as_raw())));
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state();
        let h = s.create("fence", Res::Fence)?;
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        s.fences.insert(h, state);
        Ok(vk::Fence::from_raw(h))
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        let mut s = self.state();
        s.fences.remove(&fence.as_raw());
        s.log.push(Call::Destroy(Res::Fence(fence.as_raw())));
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut s = self.state();
        let raw = fence.as_raw();
        s.log.push(Call::WaitFence(raw));
        match s.fences.get(&raw).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                // the GPU finishes the work we are blocked on
                s.retire_fence(raw);
                Ok(())
            }
            // nothing will ever signal it: a real wait would hang
            Some(FenceState::Unsignaled) | None => Err(vk::Result::TIMEOUT),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state();
        let raw = fence.as_raw();
        if s.fences.get(&raw) == Some(&FenceState::Pending) {
            s.violations.push(format!("fence {raw:#x} reset while pending"));
        }
        s.fences.insert(raw, FenceState::Unsignaled);
        s.log.push(Call::ResetFence(raw));
        Ok(())
    }

    fn queue_submit(
        &mut self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut s = self.state();
        let raw_fence = fence.as_raw();
        if s.fences.get(&raw_fence) != Some(&FenceState::Unsignaled) {
            s.violations
                .push(format!("submit with fence {raw_fence:#x} not reset"));
        }
        for submit in submits {
            // SAFETY: the submit info points at a live slice for the duration of the call.
            let cmds = unsafe {
                std::slice::from_raw_parts(
                    submit.p_command_buffers,
                    submit.command_buffer_count as usize,
                )
            };
            for cmd in cmds {
                s.in_flight.push((cmd.as_raw(), raw_fence));
                s.log.push(Call::Submit {
                    cmd: cmd.as_raw(),
                    fence: raw_fence,
                });
            }
        }
        s.fences.insert(raw_fence, FenceState::Pending);
        Ok(())
    }

    fn queue_wait_idle(&mut self, _queue: vk::Queue) -> VkResult<()> {
        let mut s = self.state();
        s.log.push(Call::QueueWaitIdle);
        if s.idle_completes_work {
            s.retire_all();
        }
        Ok(())
    }

    fn device_wait_idle(&mut self) -> VkResult<()> {
        let mut s = self.state();
        s.log.push(Call::DeviceWaitIdle);
        if s.idle_completes_work {
            s.retire_all();
        }
        Ok(())
    }
}

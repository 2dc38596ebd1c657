// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

/// The GPU calls the lifecycle and frame loop are built from.
///
/// Methods mirror the Vulkan entry points one-to-one and take the same create
/// infos, so the policy in this crate fills in every structure and the backend
/// only forwards it. Instance, surface and device are held inside the backend;
/// every other object is handed back as a `vk` handle and owned by the caller.
///
/// Destroy methods must tolerate being called with handles created by the
/// same backend only; passing null handles is never done by this crate.
pub trait GpuBackend {
    // --- device context -------------------------------------------------

    /// Creates the API instance with the platform's required extensions.
    fn create_instance(&mut self) -> VkResult<()>;
    /// Creates the drawable surface for the window the backend was built for.
    fn create_surface(&mut self) -> VkResult<vk::SurfaceKHR>;
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    /// Human readable device name, for logs.
    fn physical_device_name(&self, phys: vk::PhysicalDevice) -> String;
    fn queue_family_properties(&self, phys: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn surface_support(&self, phys: vk::PhysicalDevice, family: u32) -> VkResult<bool>;
    fn create_device(
        &mut self,
        phys: vk::PhysicalDevice,
        info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<()>;
    fn device_queue(&self, family: u32, index: u32) -> vk::Queue;
    fn destroy_device(&mut self);
    fn destroy_surface(&mut self);
    fn destroy_instance(&mut self);

    // --- physical device queries ----------------------------------------

    fn surface_capabilities(&self, phys: vk::PhysicalDevice)
        -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, phys: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn format_properties(&self, phys: vk::PhysicalDevice, format: vk::Format)
        -> vk::FormatProperties;
    fn memory_properties(&self, phys: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;

    // --- swapchain ------------------------------------------------------

    fn create_swapchain(
        &mut self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the swapchain is suboptimal.
    fn queue_present(&mut self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>)
        -> VkResult<bool>;

    // --- images and memory ----------------------------------------------

    fn create_image_view(&mut self, info: &vk::ImageViewCreateInfo<'_>)
        -> VkResult<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn create_image(&mut self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn destroy_image(&mut self, image: vk::Image);
    fn allocate_memory(&mut self, info: &vk::MemoryAllocateInfo<'_>)
        -> VkResult<vk::DeviceMemory>;
    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
    fn free_memory(&mut self, memory: vk::DeviceMemory);

    // --- render pass and framebuffers -------------------------------------

    fn create_render_pass(&mut self, info: &vk::RenderPassCreateInfo<'_>)
        -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    fn create_framebuffer(&mut self, info: &vk::FramebufferCreateInfo<'_>)
        -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    // --- commands ---------------------------------------------------------

    fn create_command_pool(&mut self, info: &vk::CommandPoolCreateInfo<'_>)
        -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&mut self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &mut self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()>;
    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>);
    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer);

    // --- synchronization and queues ---------------------------------------

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()>;
    fn queue_submit(
        &mut self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()>;
    fn queue_wait_idle(&mut self, queue: vk::Queue) -> VkResult<()>;
    fn device_wait_idle(&mut self) -> VkResult<()>;
}

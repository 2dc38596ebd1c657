// SPDX-License-Identifier: CEPL-1.0
//! [`GpuBackend`] over `ash`. Instance, surface and logical device live here;
//! everything else is created on request and owned by the caller.
#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::{c_void, CStr, CString};

use ash::prelude::VkResult;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use serde::Deserialize;
use tracing::{debug, error, info, trace, warn, Level};

use telescope_render::{GfxError, GfxResult, GpuBackend};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"telescope";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendOptions {
    pub app_name: String,
    /// Enable the Khronos validation layer and route its messages to tracing.
    pub validation: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            app_name: "telescope".into(),
            validation: false,
        }
    }
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes a valid callback struct for the duration of the call.
    let msg = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    match severity_level(severity) {
        Level::ERROR => error!("vk[{kind:?}] {msg}"),
        Level::WARN => warn!("vk[{kind:?}] {msg}"),
        Level::DEBUG => debug!("vk[{kind:?}] {msg}"),
        _ => trace!("vk[{kind:?}] {msg}"),
    }
    vk::FALSE
}

struct Messenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Vulkan through `ash`, for one window.
///
/// Handle-returning calls made before the instance or device exists fail
/// with `ERROR_INITIALIZATION_FAILED`; queries return empty values.
pub struct AshBackend {
    entry: Entry,
    options: BackendOptions,
    display: RawDisplayHandle,
    window: RawWindowHandle,

    instance: Option<Instance>,
    messenger: Option<Messenger>,
    surface_loader: Option<surface::Instance>,
    surface: vk::SurfaceKHR,
    device: Option<Device>,
    swapchain_loader: Option<swapchain::Device>,
}

const NOT_READY: vk::Result = vk::Result::ERROR_INITIALIZATION_FAILED;

impl AshBackend {
    /// Loads the Vulkan library and captures the window's raw handles.
    ///
    /// # Safety
    /// The window behind `window` and `display` must outlive the backend and
    /// every surface it creates.
    pub unsafe fn new(
        window: &impl HasWindowHandle,
        display: &impl HasDisplayHandle,
        options: BackendOptions,
    ) -> GfxResult<Self> {
        let window = window.window_handle()?.as_raw();
        let display = display.display_handle()?.as_raw();
        // SAFETY: the loaded library stays alive inside `Entry`.
        let entry = unsafe { Entry::load() }.map_err(|e| GfxError::Loader(e.to_string()))?;
        debug!("vk: loader ready (validation={})", options.validation);
        Ok(Self {
            entry,
            options,
            display,
            window,
            instance: None,
            messenger: None,
            surface_loader: None,
            surface: vk::SurfaceKHR::null(),
            device: None,
            swapchain_loader: None,
        })
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    /// The logical device, for recording draw commands inside a frame.
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    fn inst(&self) -> VkResult<&Instance> {
        self.instance.as_ref().ok_or(NOT_READY)
    }

    fn dev(&self) -> VkResult<&Device> {
        self.device.as_ref().ok_or(NOT_READY)
    }

    fn surfaces(&self) -> VkResult<&surface::Instance> {
        self.surface_loader.as_ref().ok_or(NOT_READY)
    }

    fn swapchains(&self) -> VkResult<&swapchain::Device> {
        self.swapchain_loader.as_ref().ok_or(NOT_READY)
    }

    fn validation_available(&self) -> bool {
        // SAFETY: plain global query.
        let layers = match unsafe { self.entry.enumerate_instance_layer_properties() } {
            Ok(layers) => layers,
            Err(e) => {
                warn!("vk: cannot enumerate layers: {e}");
                return false;
            }
        };
        layers
            .iter()
            .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
    }

    fn create_messenger(&mut self) {
        let Some(instance) = &self.instance else {
            return;
        };
        let loader = debug_utils::Instance::new(&self.entry, instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        // SAFETY: instance was created with VK_EXT_debug_utils enabled.
        match unsafe { loader.create_debug_utils_messenger(&info, None) } {
            Ok(handle) => self.messenger = Some(Messenger { loader, handle }),
            Err(e) => warn!("vk: debug messenger unavailable: {e}"),
        }
    }
}

impl GpuBackend for AshBackend {
    fn create_instance(&mut self) -> VkResult<()> {
        let app_name = CString::new(self.options.app_name.replace('\0', "")).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(ENGINE_NAME)
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = ash_window::enumerate_required_extensions(self.display)?.to_vec();
        let validation = self.options.validation && self.validation_available();
        if self.options.validation && !validation {
            warn!("vk: validation requested but {VALIDATION_LAYER:?} is not installed");
        }
        let mut layers = Vec::new();
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        // SAFETY: every pointer in `info` outlives the call.
        let instance = unsafe { self.entry.create_instance(&info, None) }?;
        self.surface_loader = Some(surface::Instance::new(&self.entry, &instance));
        self.instance = Some(instance);
        if validation {
            self.create_messenger();
        }
        info!("vk: instance created ({} extensions)", extensions.len());
        Ok(())
    }

    fn create_surface(&mut self) -> VkResult<vk::SurfaceKHR> {
        let instance = self.inst()?;
        // SAFETY: the raw handles stay valid per the contract of `new`.
        let surface = unsafe {
            ash_window::create_surface(&self.entry, instance, self.display, self.window, None)
        }?;
        self.surface = surface;
        Ok(surface)
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        // SAFETY: instance is alive.
        unsafe { self.inst()?.enumerate_physical_devices() }
    }

    fn physical_device_name(&self, phys: vk::PhysicalDevice) -> String {
        let Some(instance) = &self.instance else {
            return String::new();
        };
        // SAFETY: `phys` was enumerated from this instance.
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".into());
        format!("{name} ({:?})", props.device_type)
    }

    fn queue_family_properties(&self, phys: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.instance.as_ref().map_or_else(Vec::new, |i| {
            // SAFETY: `phys` was enumerated from this instance.
            unsafe { i.get_physical_device_queue_family_properties(phys) }
        })
    }

    fn surface_support(&self, phys: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        // SAFETY: surface and device come from this instance.
        unsafe {
            self.surfaces()?
                .get_physical_device_surface_support(phys, family, self.surface)
        }
    }

    fn create_device(
        &mut self,
        phys: vk::PhysicalDevice,
        info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<()> {
        let Some(instance) = &self.instance else {
            return Err(NOT_READY);
        };
        // SAFETY: `info` is fully populated by the caller.
        let device = unsafe { instance.create_device(phys, info, None) }?;
        self.swapchain_loader = Some(swapchain::Device::new(instance, &device));
        self.device = Some(device);
        Ok(())
    }

    fn device_queue(&self, family: u32, index: u32) -> vk::Queue {
        self.device.as_ref().map_or(vk::Queue::null(), |d| {
            // SAFETY: family and index were requested at device creation.
            unsafe { d.get_device_queue(family, index) }
        })
    }

    fn destroy_device(&mut self) {
        self.swapchain_loader = None;
        if let Some(device) = self.device.take() {
            // SAFETY: every child object has been destroyed by the caller.
            unsafe { device.destroy_device(None) };
        }
    }

    fn destroy_surface(&mut self) {
        let surface = std::mem::take(&mut self.surface);
        if let (Some(loader), false) = (&self.surface_loader, surface == vk::SurfaceKHR::null()) {
            // SAFETY: the swapchain using it is gone.
            unsafe { loader.destroy_surface(surface, None) };
        }
    }

    fn destroy_instance(&mut self) {
        if let Some(m) = self.messenger.take() {
            // SAFETY: created from the instance that is still alive.
            unsafe { m.loader.destroy_debug_utils_messenger(m.handle, None) };
        }
        self.surface_loader = None;
        if let Some(instance) = self.instance.take() {
            // SAFETY: surface and device are already gone.
            unsafe { instance.destroy_instance(None) };
        }
    }

    fn surface_capabilities(&self, phys: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        // SAFETY: surface belongs to this instance.
        unsafe {
            self.surfaces()?
                .get_physical_device_surface_capabilities(phys, self.surface)
        }
    }

    fn surface_formats(&self, phys: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        // SAFETY: surface belongs to this instance.
        unsafe { self.surfaces()?.get_physical_device_surface_formats(phys, self.surface) }
    }

    fn format_properties(&self, phys: vk::PhysicalDevice, format: vk::Format) -> vk::FormatProperties {
        self.instance.as_ref().map_or_else(Default::default, |i| {
            // SAFETY: `phys` was enumerated from this instance.
            unsafe { i.get_physical_device_format_properties(phys, format) }
        })
    }

    fn memory_properties(&self, phys: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        self.instance.as_ref().map_or_else(Default::default, |i| {
            // SAFETY: `phys` was enumerated from this instance.
            unsafe { i.get_physical_device_memory_properties(phys) }
        })
    }

    fn create_swapchain(&mut self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        // SAFETY: the previous swapchain for this surface has been destroyed.
        unsafe { self.swapchains()?.create_swapchain(info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        // SAFETY: the swapchain was created through this device's loader.
        unsafe { self.swapchains()?.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = &self.swapchain_loader {
            // SAFETY: no image of this swapchain is still acquired or in flight.
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        // SAFETY: the swapchain was created through this device's loader.
        unsafe {
            self.swapchains()?
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(&mut self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        // SAFETY: the present info points at live arrays for the duration of the call.
        unsafe { self.swapchains()?.queue_present(queue, info) }
    }

    fn create_image_view(&mut self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_image_view(info, None) }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_image_view(view, None) };
        }
    }

    fn create_image(&mut self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_image(info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        // SAFETY: `image` was created on this device.
        self.device.as_ref().map_or_else(Default::default, |d| unsafe {
            d.get_image_memory_requirements(image)
        })
    }

    fn destroy_image(&mut self, image: vk::Image) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_image(image, None) };
        }
    }

    fn allocate_memory(&mut self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.allocate_memory(info, None) }
    }

    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        // SAFETY: image and memory belong to this device and the memory is unbound.
        unsafe { self.dev()?.bind_image_memory(image, memory, 0) }
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.free_memory(memory, None) };
        }
    }

    fn create_render_pass(&mut self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(&mut self, info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_command_pool(&mut self, info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_command_pool(info, None) }
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_command_pool(pool, None) };
        }
    }

    fn allocate_command_buffers(
        &mut self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.allocate_command_buffers(info) }
    }

    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.free_command_buffers(pool, buffers) };
        }
    }

    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        // SAFETY: `cmd` comes from a reset-capable pool of this device and is not in flight.
        unsafe {
            self.dev()?
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        // SAFETY: `cmd` comes from a reset-capable pool of this device and is not in flight.
        unsafe { self.dev()?.begin_command_buffer(cmd, info) }
    }

    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        // SAFETY: `cmd` comes from a reset-capable pool of this device and is not in flight.
        unsafe { self.dev()?.end_command_buffer(cmd) }
    }

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        if let Some(d) = &self.device {
            // SAFETY: `cmd` comes from a reset-capable pool of this device and is not in flight.
            unsafe { d.cmd_begin_render_pass(cmd, info, vk::SubpassContents::INLINE) };
        }
    }

    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        if let Some(d) = &self.device {
            // SAFETY: `cmd` comes from a reset-capable pool of this device and is not in flight.
            unsafe { d.cmd_end_render_pass(cmd) };
        }
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: the create info is fully populated by the caller and outlives the call.
        unsafe { self.dev()?.create_fence(&info, None) }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        if let Some(d) = &self.device {
            // SAFETY: the caller has stopped using the handle and the device is idle for it.
            unsafe { d.destroy_fence(fence, None) };
        }
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        // SAFETY: the fence belongs to this device.
        unsafe { self.dev()?.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        // SAFETY: the fence belongs to this device.
        unsafe { self.dev()?.reset_fences(&[fence]) }
    }

    fn queue_submit(
        &mut self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        // SAFETY: the submit infos point at live arrays and the fence is unsignaled.
        unsafe { self.dev()?.queue_submit(queue, submits, fence) }
    }

    fn queue_wait_idle(&mut self, queue: vk::Queue) -> VkResult<()> {
        // SAFETY: queue and device are alive.
        unsafe { self.dev()?.queue_wait_idle(queue) }
    }

    fn device_wait_idle(&mut self) -> VkResult<()> {
        match &self.device {
            // SAFETY: queue and device are alive.
            Some(d) => unsafe { d.device_wait_idle() },
            None => Ok(()),
        }
    }
}

// The graphics context tears everything down first; this only catches a
// backend dropped on its own after a partial bring-up.
impl Drop for AshBackend {
    fn drop(&mut self) {
        if self.device.is_some() || self.instance.is_some() {
            warn!("vk: backend dropped with live device or instance");
            self.destroy_device();
            self.destroy_surface();
            self.destroy_instance();
        }
    }
}

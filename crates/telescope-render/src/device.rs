// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info};

use crate::{GfxError, GfxResult, GpuBackend};

/// Graphics and present queue families, resolved once before device creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// One family serves both roles; swapchain images can stay exclusive.
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }

    /// Family indices to request queues from, deduplicated.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_unified() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Selected physical device, the logical device opened on it, and its queues.
#[derive(Clone, Copy, Debug)]
pub struct DeviceContext {
    pub physical: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// Picks the first enumerated device.
// TODO: score candidates (discrete GPU first, then surface format support).
pub fn select_physical_device(devices: &[vk::PhysicalDevice]) -> GfxResult<vk::PhysicalDevice> {
    devices.first().copied().ok_or(GfxError::NoPhysicalDevice)
}

/// Scans the families once, keeping the first graphics-capable index and,
/// independently, the first index that can present to the surface. Stops as
/// soon as both are known. `present_support` is only queried while the
/// present index is still unresolved.
pub fn select_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut present_support: F,
) -> GfxResult<QueueFamilies>
where
    F: FnMut(u32) -> GfxResult<bool>,
{
    let mut graphics = None;
    let mut present = None;

    for (i, family) in families.iter().enumerate() {
        let index = i as u32;
        if family.queue_count == 0 {
            continue;
        }
        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if present.is_none() && present_support(index)? {
            present = Some(index);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Ok(QueueFamilies {
        graphics: graphics.ok_or(GfxError::NoGraphicsQueue)?,
        present: present.ok_or(GfxError::NoPresentQueue)?,
    })
}

impl DeviceContext {
    /// Picks the device and queue families, then opens the logical device with
    /// one queue per family at priority 1.0, the swapchain extension and
    /// anisotropic sampling enabled.
    pub fn create<B: GpuBackend>(gpu: &mut B) -> GfxResult<Self> {
        let devices = gpu
            .enumerate_physical_devices()
            .map_err(GfxError::device("enumerate_physical_devices"))?;
        let physical = select_physical_device(&devices)?;

        let props = gpu.queue_family_properties(physical);
        let families = select_queue_families(&props, |family| {
            gpu.surface_support(physical, family)
                .map_err(GfxError::device("get_physical_device_surface_support"))
        })?;
        info!(
            "vk: device '{}' (graphics family {}, present family {})",
            gpu.physical_device_name(physical),
            families.graphics,
            families.present
        );

        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let device_exts = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        let info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_exts)
            .enabled_features(&features);

        gpu.create_device(physical, &info)
            .map_err(GfxError::creation("logical device"))?;
        debug!("vk: logical device created ({} queue create infos)", queue_infos.len());

        Ok(Self {
            physical,
            families,
            graphics_queue: gpu.device_queue(families.graphics, 0),
            present_queue: gpu.device_queue(families.present, 0),
        })
    }
}

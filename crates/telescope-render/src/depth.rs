// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::{GfxError, GfxResult, GpuBackend};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Depth/stencil attachment sized to the current swapchain extent.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthResource {
    pub format: vk::Format,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

/// First candidate whose optimal-tiling features allow a depth/stencil attachment.
pub fn select_depth_format<F>(mut properties: F) -> GfxResult<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&fmt| {
            properties(fmt)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(GfxError::NoDepthFormat)
}

/// First memory type allowed by `type_bits` whose flags include all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

impl DepthResource {
    /// Creates a 2D single-mip depth image, backs it with device-local memory
    /// and wraps it in a depth-aspect view. Partially created objects are
    /// released before an error is returned.
    pub fn create<B: GpuBackend>(
        gpu: &mut B,
        phys: vk::PhysicalDevice,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> GfxResult<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = gpu
            .create_image(&image_info)
            .map_err(GfxError::creation("depth image"))?;

        let req = gpu.image_memory_requirements(image);
        let mem_props = gpu.memory_properties(phys);
        let required = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let Some(type_index) = find_memory_type(&mem_props, req.memory_type_bits, required) else {
            gpu.destroy_image(image);
            return Err(GfxError::NoSuitableMemoryType {
                type_bits: req.memory_type_bits,
                required,
            });
        };

        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(req.size)
            .memory_type_index(type_index);
        let memory = match gpu.allocate_memory(&alloc) {
            Ok(memory) => memory,
            Err(result) => {
                gpu.destroy_image(image);
                return Err(GfxError::ResourceCreation {
                    object: "depth image memory",
                    result,
                });
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = gpu
            .bind_image_memory(image, memory)
            .map_err(GfxError::creation("depth memory binding"))
            .and_then(|()| {
                gpu.create_image_view(&view_info)
                    .map_err(GfxError::creation("depth image view"))
            });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                gpu.free_memory(memory);
                gpu.destroy_image(image);
                return Err(e);
            }
        };

        debug!(
            "vk: depth {:?} {}x{} ({} bytes, memory type {})",
            format, extent.width, extent.height, req.size, type_index
        );
        Ok(Self {
            format,
            image,
            memory,
            view,
        })
    }
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info};

use crate::device::{DeviceContext, QueueFamilies};
use crate::{GfxError, GfxResult, GpuBackend, RenderSize};

/// One generation of the swapchain: its chosen parameters, the images the
/// platform owns, and the views this layer owns.
#[derive(Clone, Debug, Default)]
pub struct SwapchainState {
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

/// Takes the first reported format.
// TODO: prefer B8G8R8A8_UNORM/SRGB_NONLINEAR when the surface offers it.
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> GfxResult<vk::SurfaceFormatKHR> {
    formats.first().copied().ok_or(GfxError::NoSurfaceFormat)
}

fn clamp_dim(x: u32, lo: u32, hi: u32) -> u32 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

/// Clamps the drawable size component-wise to the surface's extent bounds.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: clamp_dim(
            want.width,
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: clamp_dim(
            want.height,
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when it is bounded (non-zero).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

impl SwapchainState {
    /// Creates the swapchain for `want`, then one color view per image.
    ///
    /// The image list returned by the platform is canonical: its length sizes
    /// every other per-image resource.
    pub fn create<B: GpuBackend>(
        gpu: &mut B,
        device: &DeviceContext,
        surface: vk::SurfaceKHR,
        want: RenderSize,
    ) -> GfxResult<Self> {
        let caps = gpu
            .surface_capabilities(device.physical)
            .map_err(GfxError::device("get_physical_device_surface_capabilities"))?;
        let formats = gpu
            .surface_formats(device.physical)
            .map_err(GfxError::device("get_physical_device_surface_formats"))?;

        let format = select_surface_format(&formats)?;
        let extent = choose_extent(&caps, want);
        let image_count = choose_image_count(&caps);

        let QueueFamilies { graphics, present } = device.families;
        let family_indices = [graphics, present];

        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);
        info = if device.families.is_unified() {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let handle = gpu
            .create_swapchain(&info)
            .map_err(GfxError::creation("swapchain"))?;

        let images = match gpu.swapchain_images(handle) {
            Ok(images) => images,
            Err(result) => {
                gpu.destroy_swapchain(handle);
                return Err(GfxError::Device {
                    op: "get_swapchain_images",
                    result,
                });
            }
        };

        let views = match create_image_views(gpu, &images, format.format) {
            Ok(views) => views,
            Err(e) => {
                gpu.destroy_swapchain(handle);
                return Err(e);
            }
        };

        info!(
            "vk: swapchain {}x{} with {} images (format {:?}, requested {})",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            image_count
        );

        Ok(Self {
            format,
            extent,
            handle,
            images,
            views,
        })
    }

    /// Canonical per-image count for command buffers, framebuffers and fences.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// One 2D color view per image, single mip level and layer. Views already
/// created are destroyed again if a later one fails.
pub fn create_image_views<B: GpuBackend>(
    gpu: &mut B,
    images: &[vk::Image],
    format: vk::Format,
) -> GfxResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        match gpu.create_image_view(&info) {
            Ok(view) => views.push(view),
            Err(result) => {
                for &view in views.iter().rev() {
                    gpu.destroy_image_view(view);
                }
                return Err(GfxError::ResourceCreation {
                    object: "swapchain image view",
                    result,
                });
            }
        }
    }
    debug!("vk: {} swapchain image views", views.len());
    Ok(views)
}

//! Swapchain creation and the surface parameter choices behind it

use ash::vk;
use std::sync::Arc;

use crate::vulkan::device::{ImageViewDesc, SwapchainDesc};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

/// Preferred surface format and color space
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR =
    vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_SRGB, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR };

/// Pick `wanted` if offered, otherwise the first available format
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    wanted: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == wanted.format && sf.color_space == wanted.color_space)
        .or_else(|| formats.first())
        .copied()
}

/// Pick `preferred` if offered, otherwise FIFO, which is always available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface's current extent, or `desired` clamped to the surface limits when the surface leaves it open
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: desired
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

/// One more image than the surface minimum, capped at the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

/// Swapchain management wrapper with RAII cleanup
///
/// Owns the chain and one color view per presentable image. The images
/// themselves belong to the chain.
pub struct Swapchain {
    ctx: Arc<DeviceContext>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a new swapchain
    pub fn new(
        ctx: &Arc<DeviceContext>,
        desired_extent: vk::Extent2D,
        wanted_format: vk::SurfaceFormatKHR,
        preferred_mode: vk::PresentModeKHR,
    ) -> VulkanResult<Self> {
        let device = ctx.device();
        let capabilities = device.surface_capabilities().at_call_site()?;
        let format = choose_surface_format(&device.surface_formats().at_call_site()?, wanted_format)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&device.surface_present_modes().at_call_site()?, preferred_mode);
        let extent = choose_extent(&capabilities, desired_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation { reason: "Swapchain extent is zero".to_string() });
        }

        let swapchain = device.create_swapchain(&SwapchainDesc {
            min_image_count: choose_image_count(&capabilities),
            format,
            extent,
            present_mode,
            pre_transform: capabilities.current_transform,
            queue_family_indices: ctx.queue_families().unique(),
        })
        .at_call_site()?;

        let mut chain = Self {
            ctx: Arc::clone(ctx),
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            format,
            extent,
            present_mode,
        };
        chain.images = device.swapchain_images(swapchain).at_call_site()?;
        for &image in &chain.images {
            let view = device.create_image_view(&ImageViewDesc {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                aspect: vk::ImageAspectFlags::COLOR,
                mip_levels: 1,
                layer_count: 1,
            })
            .at_call_site()?;
            chain.views.push(view);
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            chain.images.len(),
            format.format,
            present_mode
        );
        Ok(chain)
    }

    /// Get swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Presentable images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One color view per image
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Surface format in use
    pub const fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Present mode in use
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = self.ctx.device();
        for &view in &self.views {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.swapchain);
    }
}

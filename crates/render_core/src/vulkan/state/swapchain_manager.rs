//! Swapchain plus everything derived from it
//!
//! The manager owns the render pass, the swapchain with its views, the depth
//! buffer and one framebuffer per swapchain image. Recreation waits for the
//! device to go idle, then rebuilds the whole chain; objects are never
//! patched in place.

use ash::vk;
use std::sync::Arc;

use super::swapchain::{choose_extent, Swapchain, PREFERRED_FORMAT};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::rendering::render_pass::{Framebuffer, RenderPass, DEPTH_FORMAT};
use crate::vulkan::resources::image::{Image, ImageLayout, ImageSpec};

/// Swapchain, depth buffer, framebuffers and the render pass they share
pub struct SwapchainManager {
    // Field order is drop order: framebuffers, then depth, then the chain and its views.
    framebuffers: Vec<Framebuffer>,
    depth: Option<Image>,
    swapchain: Option<Swapchain>,
    render_pass: RenderPass,
    ctx: Arc<DeviceContext>,
    desired_extent: vk::Extent2D,
    preferred_mode: vk::PresentModeKHR,
    generation: u64,
}

impl SwapchainManager {
    /// Create the chain and its dependents for a window of `desired_extent`
    pub fn new(
        ctx: &Arc<DeviceContext>,
        desired_extent: vk::Extent2D,
        preferred_mode: vk::PresentModeKHR,
    ) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(ctx, desired_extent, PREFERRED_FORMAT, preferred_mode)?;
        let render_pass = RenderPass::new_forward_pass(ctx, swapchain.format().format)?;
        let mut manager = Self {
            framebuffers: Vec::new(),
            depth: None,
            swapchain: Some(swapchain),
            render_pass,
            ctx: Arc::clone(ctx),
            desired_extent,
            preferred_mode,
            generation: 0,
        };
        manager.build_dependents()?;
        Ok(manager)
    }

    fn chain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain.as_ref().ok_or(VulkanError::ResourceNotFound { kind: "swapchain" })
    }

    fn build_dependents(&mut self) -> VulkanResult<()> {
        let chain = self.chain()?;
        let extent = chain.extent();
        let views = chain.views().to_vec();

        let mut depth = Image::new(&self.ctx, ImageSpec::depth(extent, DEPTH_FORMAT))?;
        depth.transition_layout(ImageLayout::DepthStencilAttachmentOptimal)?;
        let framebuffers = views
            .iter()
            .map(|&view| Framebuffer::new(&self.ctx, &self.render_pass, view, depth.view(), extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        self.depth = Some(depth);
        self.framebuffers = framebuffers;
        Ok(())
    }

    fn release_chain(&mut self) {
        self.framebuffers.clear();
        self.depth = None;
        self.swapchain = None;
    }

    /// Record a new window size; takes effect on the next recreation
    pub fn set_desired_extent(&mut self, extent: vk::Extent2D) {
        self.desired_extent = extent;
    }

    /// Destroy and rebuild the chain and every dependent object
    ///
    /// Returns `Ok(false)` without touching anything when the surface
    /// currently has a zero extent (a minimized window).
    pub fn recreate(&mut self) -> VulkanResult<bool> {
        let capabilities = self.ctx.device().surface_capabilities().at_call_site()?;
        let extent = choose_extent(&capabilities, self.desired_extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Skipping swapchain recreation for zero-sized surface");
            return Ok(false);
        }

        self.ctx.wait_idle()?;
        let format = self.chain().map_or(PREFERRED_FORMAT, Swapchain::format);
        self.release_chain();

        let swapchain = Swapchain::new(&self.ctx, extent, format, self.preferred_mode)?;
        if swapchain.format().format != self.render_pass.color_format() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Surface format changed from {:?} to {:?}",
                    self.render_pass.color_format(),
                    swapchain.format().format
                ),
            });
        }
        self.swapchain = Some(swapchain);
        self.build_dependents()?;
        self.generation += 1;
        log::info!("Recreated swapchain at {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Render pass every framebuffer was created for
    pub const fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Current swapchain handle
    pub fn swapchain_handle(&self) -> VulkanResult<vk::SwapchainKHR> {
        self.chain().map(Swapchain::handle)
    }

    /// Current image extent
    pub fn extent(&self) -> VulkanResult<vk::Extent2D> {
        self.chain().map(Swapchain::extent)
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    /// Framebuffer for swapchain image `index`
    pub fn framebuffer(&self, index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers
            .get(index as usize)
            .map(Framebuffer::handle)
            .ok_or(VulkanError::ResourceNotFound { kind: "framebuffer" })
    }

    /// Every framebuffer handle
    pub fn framebuffer_handles(&self) -> Vec<vk::Framebuffer> {
        self.framebuffers.iter().map(Framebuffer::handle).collect()
    }

    /// Every swapchain image view handle
    pub fn view_handles(&self) -> Vec<vk::ImageView> {
        self.swapchain.as_ref().map(|chain| chain.views().to_vec()).unwrap_or_default()
    }

    /// Depth image view
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.depth.as_ref().map(Image::view)
    }

    /// Number of completed recreations
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::headless::ObjectKind;
    use crate::vulkan::device::HeadlessDevice;
    use crate::vulkan::initialization::adapter::QueueFamilies;

    fn setup() -> (Arc<HeadlessDevice>, Arc<DeviceContext>) {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        (device, ctx)
    }

    #[test]
    fn test_framebuffer_per_image() {
        let (device, ctx) = setup();
        let manager =
            SwapchainManager::new(&ctx, vk::Extent2D { width: 800, height: 600 }, vk::PresentModeKHR::FIFO).unwrap();
        assert_eq!(manager.image_count(), 3);
        assert_eq!(device.live_count_of(ObjectKind::Framebuffer), 3);
        for framebuffer in manager.framebuffer_handles() {
            assert_eq!(device.framebuffer_extent(framebuffer).map(|e| e.width), Some(800));
        }
        assert!(manager.framebuffer(3).is_err());
    }

    #[test]
    fn test_zero_extent_skips_recreation() {
        let (device, ctx) = setup();
        let mut manager =
            SwapchainManager::new(&ctx, vk::Extent2D { width: 800, height: 600 }, vk::PresentModeKHR::FIFO).unwrap();
        let before = manager.swapchain_handle().unwrap();
        device.set_surface_extent(vk::Extent2D { width: 0, height: 0 });
        assert!(!manager.recreate().unwrap());
        assert_eq!(manager.swapchain_handle().unwrap(), before);
        assert_eq!(manager.generation(), 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let (device, ctx) = setup();
        let manager =
            SwapchainManager::new(&ctx, vk::Extent2D { width: 800, height: 600 }, vk::PresentModeKHR::FIFO).unwrap();
        drop(manager);
        drop(ctx);
        assert_eq!(device.live_count(), 0);
        assert_eq!(device.invalid_frees(), 0);
    }
}

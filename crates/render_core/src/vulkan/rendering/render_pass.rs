//! Forward render pass and framebuffers

use ash::vk;
use std::sync::Arc;

use crate::vulkan::device::{AttachmentDesc, RenderPassDesc};
use crate::vulkan::error::{CallSite, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

/// Format of the depth attachment
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    ctx: Arc<DeviceContext>,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
}

impl RenderPass {
    /// Create a new render pass for basic forward rendering
    ///
    /// Color is cleared and stored, then handed to presentation; depth is
    /// cleared and discarded.
    pub fn new_forward_pass(ctx: &Arc<DeviceContext>, color_format: vk::Format) -> VulkanResult<Self> {
        let render_pass = ctx.device().create_render_pass(&RenderPassDesc {
            color: AttachmentDesc {
                format: color_format,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            },
            depth: Some(AttachmentDesc {
                format: DEPTH_FORMAT,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
        })
        .at_call_site()?;
        log::debug!("Created forward render pass for {color_format:?}");
        Ok(Self { ctx: Arc::clone(ctx), render_pass, color_format })
    }

    /// Get render pass handle
    pub const fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Color attachment format
    pub const fn color_format(&self) -> vk::Format {
        self.color_format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.ctx.device().destroy_render_pass(self.render_pass);
    }
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    ctx: Arc<DeviceContext>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer over a color view and a depth view
    pub fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: &RenderPass,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer = ctx
            .device()
            .create_framebuffer(render_pass.handle(), &[color_view, depth_view], extent)
            .at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), framebuffer, extent })
    }

    /// Get framebuffer handle
    pub const fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Extent the framebuffer was created with
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.ctx.device().destroy_framebuffer(self.framebuffer);
    }
}

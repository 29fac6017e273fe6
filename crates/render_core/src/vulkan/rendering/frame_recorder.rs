//! Per-frame draw recording
//!
//! A [`FrameRecorder`] re-records one frame slot's command buffer: render
//! pass with clears, pipeline, dynamic viewport/scissor and the frame uniform
//! set, then one indexed draw per [`DrawCommand`]. Vertex, index and material
//! bindings are only re-issued when they differ from the previous draw.

use ash::vk;
use std::sync::Arc;

use super::commands::CommandRecorder;
use super::pipeline::{ModelConstants, PipelineLayout};
use crate::vulkan::device::{ClearValues, RenderPassBegin};
use crate::vulkan::error::{VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::resources::descriptors::{FRAME_SET, MATERIAL_SET};

/// Everything one indexed draw needs, as raw handles
#[derive(Debug, Clone, Copy)]
pub struct DrawCommand {
    /// Vertex buffer bound at binding 0
    pub vertex_buffer: vk::Buffer,
    /// 32-bit index buffer
    pub index_buffer: vk::Buffer,
    /// Number of indices to draw
    pub index_count: u32,
    /// Material descriptor set bound at set 1
    pub material_set: vk::DescriptorSet,
    /// Per-object push constants
    pub constants: ModelConstants,
}

/// Per-frame draw counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Indexed draws issued
    pub draws: u32,
    /// Vertex, index and material binds issued
    pub binds: u32,
    /// Binds skipped because the same object was already bound
    pub elided_binds: u32,
}

/// Framebuffer, pipeline and frame set a frame is recorded against
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Render pass the framebuffer was created for
    pub render_pass: vk::RenderPass,
    /// Framebuffer of the acquired swapchain image
    pub framebuffer: vk::Framebuffer,
    /// Framebuffer extent
    pub extent: vk::Extent2D,
    /// Clear values for color and depth
    pub clear: ClearValues,
    /// Graphics pipeline
    pub pipeline: vk::Pipeline,
    /// Layout of the graphics pipeline
    pub layout: vk::PipelineLayout,
    /// Frame uniform set of the current slot
    pub frame_set: vk::DescriptorSet,
}

/// Records one frame into a slot's command buffer
pub struct FrameRecorder {
    recorder: CommandRecorder,
    layout: vk::PipelineLayout,
    vertex_buffer: Option<vk::Buffer>,
    index_buffer: Option<vk::Buffer>,
    material_set: Option<vk::DescriptorSet>,
    stats: DrawStats,
}

impl FrameRecorder {
    /// Reset `command_buffer` and record everything up to the first draw
    pub fn begin(ctx: Arc<DeviceContext>, command_buffer: vk::CommandBuffer, target: &FrameTarget) -> VulkanResult<Self> {
        let mut recorder = CommandRecorder::new(ctx, command_buffer);
        recorder.reset()?;
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        recorder.begin_render_pass(&RenderPassBegin {
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
            extent: target.extent,
            clear: target.clear,
        })?;
        recorder.bind_pipeline(target.pipeline);
        recorder.set_viewport_and_scissor(target.extent);
        recorder.bind_descriptor_sets(target.layout, FRAME_SET, &[target.frame_set]);

        Ok(Self {
            recorder,
            layout: target.layout,
            vertex_buffer: None,
            index_buffer: None,
            material_set: None,
            stats: DrawStats::default(),
        })
    }

    fn bind_if_changed<T: PartialEq + Copy>(current: &mut Option<T>, next: T, stats: &mut DrawStats) -> bool {
        if *current == Some(next) {
            stats.elided_binds += 1;
            false
        } else {
            *current = Some(next);
            stats.binds += 1;
            true
        }
    }

    /// Record one indexed draw
    pub fn draw(&mut self, draw: &DrawCommand) -> VulkanResult<()> {
        if !self.recorder.in_render_pass() {
            return Err(VulkanError::InvalidOperation { reason: "Draw recorded outside the render pass".to_string() });
        }
        if Self::bind_if_changed(&mut self.vertex_buffer, draw.vertex_buffer, &mut self.stats) {
            self.recorder.bind_vertex_buffer(draw.vertex_buffer);
        }
        if Self::bind_if_changed(&mut self.index_buffer, draw.index_buffer, &mut self.stats) {
            self.recorder.bind_index_buffer(draw.index_buffer);
        }
        if Self::bind_if_changed(&mut self.material_set, draw.material_set, &mut self.stats) {
            self.recorder.bind_descriptor_sets(self.layout, MATERIAL_SET, &[draw.material_set]);
        }
        self.recorder
            .push_constants(self.layout, PipelineLayout::PUSH_STAGES, bytemuck::bytes_of(&draw.constants));
        self.recorder.draw_indexed(draw.index_count);
        self.stats.draws += 1;
        Ok(())
    }

    /// Counters so far
    pub const fn stats(&self) -> DrawStats {
        self.stats
    }

    /// End the render pass and the command buffer
    pub fn finish(mut self) -> VulkanResult<(vk::CommandBuffer, DrawStats)> {
        self.recorder.end_render_pass()?;
        let command_buffer = self.recorder.end()?;
        Ok((command_buffer, self.stats))
    }
}

/// Record a whole frame in one call
pub fn record_frame(
    ctx: Arc<DeviceContext>,
    command_buffer: vk::CommandBuffer,
    target: &FrameTarget,
    draws: &[DrawCommand],
) -> VulkanResult<DrawStats> {
    let mut recorder = FrameRecorder::begin(ctx, command_buffer, target)?;
    for draw in draws {
        recorder.draw(draw)?;
    }
    recorder.finish().map(|(_, stats)| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::{HeadlessDevice, RecordedCommand};
    use crate::vulkan::initialization::adapter::QueueFamilies;
    use crate::vulkan::rendering::commands::CommandBuffers;
    use ash::vk::Handle;

    fn target() -> FrameTarget {
        FrameTarget {
            render_pass: vk::RenderPass::from_raw(1),
            framebuffer: vk::Framebuffer::from_raw(2),
            extent: vk::Extent2D { width: 320, height: 240 },
            clear: ClearValues::default(),
            pipeline: vk::Pipeline::from_raw(3),
            layout: vk::PipelineLayout::from_raw(4),
            frame_set: vk::DescriptorSet::from_raw(5),
        }
    }

    fn draw(vertex: u64, material: u64) -> DrawCommand {
        DrawCommand {
            vertex_buffer: vk::Buffer::from_raw(vertex),
            index_buffer: vk::Buffer::from_raw(vertex + 100),
            index_count: 36,
            material_set: vk::DescriptorSet::from_raw(material),
            constants: ModelConstants::default(),
        }
    }

    #[test]
    fn test_frame_command_order() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        let buffers = CommandBuffers::allocate(&ctx, 1).unwrap();
        let cb = buffers.handles()[0];
        record_frame(ctx.clone(), cb, &target(), &[draw(10, 20)]).unwrap();

        let commands = device.recorded_commands(cb);
        assert!(matches!(commands[0], RecordedCommand::BeginRenderPass(_)));
        assert!(matches!(commands[1], RecordedCommand::BindPipeline(_)));
        assert!(matches!(commands[2], RecordedCommand::SetViewport(_)));
        assert!(matches!(commands[3], RecordedCommand::SetScissor(_)));
        assert!(matches!(&commands[4], RecordedCommand::BindDescriptorSets { first_set: 0, .. }));
        assert!(matches!(commands[5], RecordedCommand::BindVertexBuffer(_)));
        assert!(matches!(commands[6], RecordedCommand::BindIndexBuffer(..)));
        assert!(matches!(&commands[7], RecordedCommand::BindDescriptorSets { first_set: 1, .. }));
        assert!(matches!(&commands[8], RecordedCommand::PushConstants { data, .. } if data.len() == 128));
        assert!(matches!(commands[9], RecordedCommand::DrawIndexed { index_count: 36, .. }));
        assert!(matches!(commands[10], RecordedCommand::EndRenderPass));
        assert_eq!(commands.len(), 11);
    }

    #[test]
    fn test_redundant_binds_are_elided() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        let buffers = CommandBuffers::allocate(&ctx, 1).unwrap();
        let cb = buffers.handles()[0];
        let stats = record_frame(ctx.clone(), cb, &target(), &[draw(10, 20), draw(10, 20), draw(11, 20)]).unwrap();

        assert_eq!(stats, DrawStats { draws: 3, binds: 5, elided_binds: 4 });
        let vertex_binds = device
            .recorded_commands(cb)
            .iter()
            .filter(|command| matches!(command, RecordedCommand::BindVertexBuffer(_)))
            .count();
        assert_eq!(vertex_binds, 2);
    }

    #[test]
    fn test_rerecording_replaces_previous_frame() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        let buffers = CommandBuffers::allocate(&ctx, 1).unwrap();
        let cb = buffers.handles()[0];
        record_frame(ctx.clone(), cb, &target(), &[draw(10, 20), draw(11, 21)]).unwrap();
        record_frame(ctx.clone(), cb, &target(), &[]).unwrap();
        assert_eq!(device.recorded_commands(cb).len(), 6);
    }
}

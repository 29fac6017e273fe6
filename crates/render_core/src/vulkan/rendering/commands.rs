//! Command buffer management
//!
//! [`CommandRecorder`] tracks the recording state of one command buffer and
//! rejects out-of-order begin/end calls. [`OneTimeCommand`] is the blocking
//! allocate → record → submit → wait idle → free path used by load-time
//! transfers and layout transitions.

use ash::vk;
use std::sync::Arc;

use crate::vulkan::device::{
    BufferImageCopy, GpuDevice, ImageBarrier, RenderPassBegin, SubmitDesc,
};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    InRenderPass,
    Executable,
}

/// Command buffer recorder with state validation
pub struct CommandRecorder {
    ctx: Arc<DeviceContext>,
    command_buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl CommandRecorder {
    /// Wrap an allocated command buffer in the initial state
    pub fn new(ctx: Arc<DeviceContext>, command_buffer: vk::CommandBuffer) -> Self {
        Self { ctx, command_buffer, state: RecordingState::Initial }
    }

    fn device(&self) -> &dyn GpuDevice {
        self.ctx.device()
    }

    fn invalid(reason: &str) -> VulkanError {
        VulkanError::InvalidOperation { reason: reason.to_string() }
    }

    /// Command buffer handle
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Whether commands are currently being recorded
    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecordingState::Recording | RecordingState::InRenderPass)
    }

    /// Reset to the initial state, discarding recorded commands
    pub fn reset(&mut self) -> VulkanResult<()> {
        if self.is_recording() {
            return Err(Self::invalid("Cannot reset a command buffer while recording"));
        }
        self.device().reset_command_buffer(self.command_buffer).at_call_site()?;
        self.state = RecordingState::Initial;
        Ok(())
    }

    /// Begin command recording
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        if self.is_recording() {
            return Err(Self::invalid("Command buffer already recording"));
        }
        self.device().begin_command_buffer(self.command_buffer, flags).at_call_site()?;
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Begin a render pass
    pub fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> VulkanResult<()> {
        if self.state != RecordingState::Recording {
            return Err(Self::invalid("Render pass must begin inside a recording outside any render pass"));
        }
        self.device().cmd_begin_render_pass(self.command_buffer, begin);
        self.state = RecordingState::InRenderPass;
        Ok(())
    }

    /// End the current render pass
    pub fn end_render_pass(&mut self) -> VulkanResult<()> {
        if self.state != RecordingState::InRenderPass {
            return Err(Self::invalid("No render pass in progress"));
        }
        self.device().cmd_end_render_pass(self.command_buffer);
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// End command recording
    pub fn end(&mut self) -> VulkanResult<vk::CommandBuffer> {
        match self.state {
            RecordingState::Recording => {}
            RecordingState::InRenderPass => return Err(Self::invalid("Render pass still in progress")),
            _ => return Err(Self::invalid("Command buffer not recording")),
        }
        self.device().end_command_buffer(self.command_buffer).at_call_site()?;
        self.state = RecordingState::Executable;
        Ok(self.command_buffer)
    }

    /// Whether the recorder is inside a render pass
    pub fn in_render_pass(&self) -> bool {
        self.state == RecordingState::InRenderPass
    }

    /// Record a buffer to buffer copy
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        self.device().cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
    }

    /// Record a buffer to image copy
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, dst: vk::Image, regions: &[BufferImageCopy]) {
        self.device().cmd_copy_buffer_to_image(
            self.command_buffer,
            src,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
    }

    /// Record an image layout barrier
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &ImageBarrier,
    ) {
        self.device().cmd_pipeline_barrier(self.command_buffer, src_stage, dst_stage, barrier);
    }

    /// Bind graphics pipeline
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.device().cmd_bind_pipeline(self.command_buffer, pipeline);
    }

    /// Bind descriptor sets starting at `first_set`
    pub fn bind_descriptor_sets(&self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        self.device().cmd_bind_descriptor_sets(self.command_buffer, layout, first_set, sets);
    }

    /// Bind vertex buffer at binding 0
    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        self.device().cmd_bind_vertex_buffer(self.command_buffer, buffer, 0);
    }

    /// Bind 32-bit index buffer
    pub fn bind_index_buffer(&self, buffer: vk::Buffer) {
        self.device().cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
    }

    /// Push constants to shaders
    pub fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        self.device().cmd_push_constants(self.command_buffer, layout, stages, 0, data);
    }

    /// Draw indexed
    pub fn draw_indexed(&self, index_count: u32) {
        self.device().cmd_draw_indexed(self.command_buffer, index_count, 0, 0);
    }

    /// Set viewport and scissor to cover `extent`
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
        self.device().cmd_set_viewport(self.command_buffer, viewport);
        self.device().cmd_set_scissor(self.command_buffer, scissor);
    }
}

/// Command buffer that is recorded once, submitted, and waited on
///
/// Dropping without [`submit_and_wait`](Self::submit_and_wait) frees the
/// buffer without executing it.
pub struct OneTimeCommand {
    recorder: CommandRecorder,
}

impl OneTimeCommand {
    /// Allocate from the context pool and begin with the one-submit flag
    pub fn begin(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let command_buffer = ctx
            .device()
            .allocate_command_buffers(ctx.command_pool(), 1)
            .at_call_site()?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation { reason: "No command buffer allocated".to_string() })?;
        let mut command = Self { recorder: CommandRecorder::new(Arc::clone(ctx), command_buffer) };
        command.recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        Ok(command)
    }

    /// Recorder for the command buffer
    pub const fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    /// End, submit to the graphics queue and block until the queue is idle
    pub fn submit_and_wait(mut self) -> VulkanResult<()> {
        let command_buffer = self.recorder.end()?;
        let ctx = &self.recorder.ctx;
        let submit = SubmitDesc { command_buffers: vec![command_buffer], ..SubmitDesc::default() };
        ctx.device().queue_submit(ctx.graphics_queue(), &submit, vk::Fence::null()).at_call_site()?;
        ctx.device().queue_wait_idle(ctx.graphics_queue()).at_call_site()
    }
}

impl Drop for OneTimeCommand {
    fn drop(&mut self) {
        let ctx = &self.recorder.ctx;
        ctx.device().free_command_buffers(ctx.command_pool(), &[self.recorder.command_buffer]);
    }
}

/// Record with `record`, then submit and wait for completion
pub fn execute_one_time<F>(ctx: &Arc<DeviceContext>, record: F) -> VulkanResult<()>
where
    F: FnOnce(&CommandRecorder) -> VulkanResult<()>,
{
    let command = OneTimeCommand::begin(ctx)?;
    record(command.recorder())?;
    command.submit_and_wait()
}

/// Primary command buffers allocated together and freed on drop
pub struct CommandBuffers {
    ctx: Arc<DeviceContext>,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    /// Allocate `count` buffers from the context pool
    pub fn allocate(ctx: &Arc<DeviceContext>, count: u32) -> VulkanResult<Self> {
        let buffers = ctx.device().allocate_command_buffers(ctx.command_pool(), count).at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), buffers })
    }

    /// Buffer handles
    pub fn handles(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        self.ctx.device().free_command_buffers(self.ctx.command_pool(), &self.buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::{HeadlessDevice, RecordedCommand};
    use crate::vulkan::initialization::adapter::QueueFamilies;

    fn context(device: &Arc<HeadlessDevice>) -> Arc<DeviceContext> {
        DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0).unwrap()
    }

    #[test]
    fn test_recorder_rejects_out_of_order_calls() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let buffers = CommandBuffers::allocate(&ctx, 1).unwrap();
        let mut recorder = CommandRecorder::new(ctx.clone(), buffers.handles()[0]);

        assert!(recorder.end().is_err());
        assert!(recorder.end_render_pass().is_err());
        recorder.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        assert!(recorder.begin(vk::CommandBufferUsageFlags::empty()).is_err());
        assert!(recorder.reset().is_err());
        recorder.end().unwrap();
        recorder.reset().unwrap();
    }

    #[test]
    fn test_one_time_command_executes_and_frees() {
        let device = Arc::new(HeadlessDevice::manual());
        let ctx = context(&device);
        let live_before = device.live_count();
        execute_one_time(&ctx, |recorder| {
            recorder.bind_pipeline(vk::Pipeline::null());
            Ok(())
        })
        .unwrap();
        assert_eq!(device.submitted_count(), 1);
        assert_eq!(device.completed_count(), 1);
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(device.live_count(), live_before);
    }

    #[test]
    fn test_failed_recording_is_not_submitted() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let result = execute_one_time(&ctx, |_| Err(VulkanError::BufferNotMapped));
        assert_eq!(result.unwrap_err(), VulkanError::BufferNotMapped);
        assert_eq!(device.submitted_count(), 0);
    }

    #[test]
    fn test_viewport_covers_extent() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let buffers = CommandBuffers::allocate(&ctx, 1).unwrap();
        let mut recorder = CommandRecorder::new(ctx.clone(), buffers.handles()[0]);
        recorder.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        recorder.set_viewport_and_scissor(vk::Extent2D { width: 640, height: 480 });
        let commands = device.recorded_commands(buffers.handles()[0]);
        assert!(matches!(commands[0], RecordedCommand::SetViewport(v) if v.width == 640.0 && v.height == 480.0));
        assert!(matches!(commands[1], RecordedCommand::SetScissor(s) if s.extent.width == 640));
    }
}

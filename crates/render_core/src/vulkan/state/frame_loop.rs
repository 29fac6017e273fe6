//! Frame loop controller
//!
//! Drives frames in flight through wait → acquire → record → submit →
//! present. Slot `i = frame_counter % F` owns a fence, two semaphores, a
//! command buffer, a mapped uniform buffer and a frame descriptor set; the
//! fence wait at the start of a frame is what makes reusing them safe.
//! Out-of-date and suboptimal results rebuild the swapchain and never reach
//! the caller as errors.
//!
//! At most one frame is open at a time. A frame that is dropped instead of
//! ended leaves its image acquired and its image-available semaphore with an
//! unwaited signal; the next `begin_frame` discards both by rebuilding the
//! swapchain and swapping in a fresh semaphore.

use ash::vk;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::swapchain_manager::SwapchainManager;
use super::sync::{timeout_ns, FrameSync};
use crate::vulkan::device::{ClearValues, PresentDesc, SubmitDesc};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::rendering::commands::CommandBuffers;
use crate::vulkan::rendering::frame_recorder::{DrawCommand, DrawStats, FrameRecorder, FrameTarget};
use crate::vulkan::rendering::pipeline::FrameUniforms;
use crate::vulkan::resources::buffer::UniformBuffer;

/// Largest supported number of frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Fixed parameters of the loop
#[derive(Debug, Clone, Copy)]
pub struct FrameLoopSettings {
    /// Number of frames that may be in flight at once
    pub frames_in_flight: usize,
    /// Longest a fence wait or image acquire may block
    pub timeout: Duration,
    /// Clear values for color and depth
    pub clear: ClearValues,
}

impl Default for FrameLoopSettings {
    fn default() -> Self {
        Self { frames_in_flight: 2, timeout: Duration::from_secs(5), clear: ClearValues::default() }
    }
}

/// Pipeline the loop records every frame with
#[derive(Debug, Clone, Copy)]
pub struct PipelineBinding {
    /// Graphics pipeline
    pub pipeline: vk::Pipeline,
    /// Its layout
    pub layout: vk::PipelineLayout,
}

/// Recording state of a frame between `begin_frame` and `end_frame`
pub struct FrameContext {
    slot: usize,
    image_index: u32,
    recorder: FrameRecorder,
    token: Arc<()>,
}

impl FrameContext {
    /// Frame slot in `0..frames_in_flight`
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Acquired swapchain image
    pub const fn image_index(&self) -> u32 {
        self.image_index
    }
}

/// Outcome of starting a frame
pub enum FrameBegin {
    /// An image was acquired and recording has started
    Ready(FrameContext),
    /// The swapchain was rebuilt (or the surface is minimized); try again next iteration
    SwapchainStale,
}

struct OpenFrame {
    slot: usize,
    token: Weak<()>,
}

impl OpenFrame {
    fn is(&self, frame: &FrameContext) -> bool {
        Weak::ptr_eq(&self.token, &Arc::downgrade(&frame.token))
    }
}

struct FrameSlot {
    sync: FrameSync,
    uniforms: UniformBuffer<FrameUniforms>,
    frame_set: vk::DescriptorSet,
}

/// Frames-in-flight state machine
pub struct FrameLoop {
    slots: Vec<FrameSlot>,
    command_buffers: CommandBuffers,
    images_in_flight: Vec<Option<usize>>,
    swapchain: SwapchainManager,
    ctx: Arc<DeviceContext>,
    pipeline: PipelineBinding,
    settings: FrameLoopSettings,
    frame_counter: u64,
    resize_pending: bool,
    stale_semaphores: Vec<usize>,
    open_frame: Option<OpenFrame>,
}

impl FrameLoop {
    /// Create per-slot sync objects and command buffers
    ///
    /// `frame_resources` supplies each slot's uniform buffer and the frame
    /// descriptor set already pointing at it; its length must equal
    /// `settings.frames_in_flight`.
    pub fn new(
        ctx: &Arc<DeviceContext>,
        swapchain: SwapchainManager,
        pipeline: PipelineBinding,
        frame_resources: Vec<(UniformBuffer<FrameUniforms>, vk::DescriptorSet)>,
        settings: FrameLoopSettings,
    ) -> VulkanResult<Self> {
        let frames = settings.frames_in_flight;
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&frames) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Frames in flight must be within 1..={MAX_FRAMES_IN_FLIGHT}, got {frames}"),
            });
        }
        if frame_resources.len() != frames {
            return Err(VulkanError::SizeMismatch { expected: frames as u64, actual: frame_resources.len() as u64 });
        }

        let slots = frame_resources
            .into_iter()
            .map(|(uniforms, frame_set)| Ok(FrameSlot { sync: FrameSync::new(ctx)?, uniforms, frame_set }))
            .collect::<VulkanResult<Vec<_>>>()?;
        let command_buffers = CommandBuffers::allocate(ctx, frames as u32)?;
        let images_in_flight = vec![None; swapchain.image_count()];
        log::info!("Frame loop ready with {frames} frame(s) in flight");

        Ok(Self {
            slots,
            command_buffers,
            images_in_flight,
            swapchain,
            ctx: Arc::clone(ctx),
            pipeline,
            settings,
            frame_counter: 0,
            resize_pending: false,
            stale_semaphores: Vec::new(),
            open_frame: None,
        })
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames completed through `end_frame`
    pub const fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Swapchain and its dependents
    pub const fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// Request a swapchain rebuild for a new window size
    pub fn notify_resize(&mut self, extent: vk::Extent2D) {
        self.swapchain.set_desired_extent(extent);
        self.resize_pending = true;
    }

    fn current_slot(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    fn recreate_swapchain(&mut self) -> VulkanResult<()> {
        if self.swapchain.recreate()? {
            self.images_in_flight = vec![None; self.swapchain.image_count()];
            self.resize_pending = false;
            // The device is idle here, so pending acquire signals are gone.
            let ctx = Arc::clone(&self.ctx);
            for slot in std::mem::take(&mut self.stale_semaphores) {
                self.slots[slot].sync.replace_image_available(&ctx)?;
            }
        }
        Ok(())
    }

    // An acquired image that will never be presented can only be released by
    // rebuilding the chain; its semaphore is replaced once that is done.
    fn discard_acquired(&mut self, slot: usize) {
        if !self.stale_semaphores.contains(&slot) {
            self.stale_semaphores.push(slot);
        }
        self.resize_pending = true;
    }

    fn timeout_error(&self, what: &'static str) -> VulkanError {
        VulkanError::DeviceTimeout { what, timeout: self.settings.timeout }
    }

    /// Whether a frame has begun and not yet ended
    pub fn has_open_frame(&self) -> bool {
        self.open_frame.as_ref().is_some_and(|open| open.token.strong_count() > 0)
    }

    fn reclaim_open_frame(&mut self) -> VulkanResult<()> {
        let Some(open) = self.open_frame.take() else {
            return Ok(());
        };
        if open.token.strong_count() > 0 {
            let slot = open.slot;
            self.open_frame = Some(open);
            return Err(VulkanError::InvalidOperation {
                reason: format!("Frame on slot {slot} has not ended; call end_frame or abandon_frame first"),
            });
        }
        log::warn!("Frame on slot {} was dropped without end_frame, discarding it", open.slot);
        self.discard_acquired(open.slot);
        Ok(())
    }

    /// Wait for the slot, acquire an image and start recording
    ///
    /// Fails with [`VulkanError::InvalidOperation`] while a previous frame is
    /// still open.
    pub fn begin_frame(&mut self) -> VulkanResult<FrameBegin> {
        self.reclaim_open_frame()?;
        if self.resize_pending {
            self.recreate_swapchain()?;
            if self.resize_pending {
                return Ok(FrameBegin::SwapchainStale);
            }
        }

        let slot = self.current_slot();
        self.slots[slot].sync.in_flight.wait(self.settings.timeout)?;

        let acquired = self
            .ctx
            .device()
            .acquire_next_image(
                self.swapchain.swapchain_handle()?,
                timeout_ns(self.settings.timeout),
                self.slots[slot].sync.image_available.handle(),
            )
            .at_call_site();
        let image_index = match acquired {
            Ok((index, false)) => index,
            Ok((_, true)) => {
                log::warn!("Swapchain suboptimal on acquire, recreating");
                self.discard_acquired(slot);
                self.recreate_swapchain()?;
                return Ok(FrameBegin::SwapchainStale);
            }
            Err(e) if e.is_out_of_date() => {
                log::warn!("Swapchain out of date on acquire, recreating");
                self.discard_acquired(slot);
                self.recreate_swapchain()?;
                return Ok(FrameBegin::SwapchainStale);
            }
            Err(e) if e.result() == Some(vk::Result::TIMEOUT) => return Err(self.timeout_error("swapchain image")),
            Err(e) => return Err(e),
        };

        match self.start_recording(slot, image_index) {
            Ok(frame) => Ok(FrameBegin::Ready(frame)),
            Err(e) => {
                self.discard_acquired(slot);
                Err(e)
            }
        }
    }

    fn start_recording(&mut self, slot: usize, image_index: u32) -> VulkanResult<FrameContext> {
        // The image may still be in use by a frame submitted from another slot.
        if let Some(owner) = self.images_in_flight.get(image_index as usize).copied().flatten() {
            if owner != slot {
                self.slots[owner].sync.in_flight.wait(self.settings.timeout)?;
            }
        }
        if let Some(entry) = self.images_in_flight.get_mut(image_index as usize) {
            *entry = Some(slot);
        }

        let target = FrameTarget {
            render_pass: self.swapchain.render_pass().handle(),
            framebuffer: self.swapchain.framebuffer(image_index)?,
            extent: self.swapchain.extent()?,
            clear: self.settings.clear,
            pipeline: self.pipeline.pipeline,
            layout: self.pipeline.layout,
            frame_set: self.slots[slot].frame_set,
        };
        let recorder = FrameRecorder::begin(Arc::clone(&self.ctx), self.command_buffers.handles()[slot], &target)?;
        let token = Arc::new(());
        self.open_frame = Some(OpenFrame { slot, token: Arc::downgrade(&token) });
        log::trace!("Frame {} began on slot {slot}, image {image_index}", self.frame_counter);
        Ok(FrameContext { slot, image_index, recorder, token })
    }

    /// Write this frame's uniform block into the slot's mapped buffer
    pub fn update_uniform(&mut self, frame: &FrameContext, data: &FrameUniforms) -> VulkanResult<()> {
        self.slots[frame.slot].uniforms.update(data)
    }

    /// Record one draw into the frame
    pub fn record_draw(&mut self, frame: &mut FrameContext, draw: &DrawCommand) -> VulkanResult<()> {
        frame.recorder.draw(draw)
    }

    fn close(&mut self, frame: &FrameContext) -> VulkanResult<()> {
        match &self.open_frame {
            Some(open) if open.is(frame) => {
                self.open_frame = None;
                Ok(())
            }
            _ => Err(VulkanError::InvalidOperation { reason: "Frame does not belong to this frame loop".to_string() }),
        }
    }

    /// Give up on a frame without submitting it
    ///
    /// Nothing recorded into the frame reaches the GPU. The swapchain is
    /// rebuilt before the next frame to release the acquired image.
    pub fn abandon_frame(&mut self, frame: FrameContext) -> VulkanResult<()> {
        self.close(&frame)?;
        let slot = frame.slot;
        drop(frame);
        log::debug!("Abandoned frame on slot {slot}");
        self.discard_acquired(slot);
        Ok(())
    }

    /// Finish recording, submit and present
    pub fn end_frame(&mut self, frame: FrameContext) -> VulkanResult<DrawStats> {
        self.close(&frame)?;
        let FrameContext { slot, image_index, recorder, .. } = frame;
        let (command_buffer, stats) = recorder.finish()?;
        let sync = &self.slots[slot].sync;

        sync.in_flight.reset()?;
        let submit = SubmitDesc {
            wait: vec![(sync.image_available.handle(), vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)],
            command_buffers: vec![command_buffer],
            signal: vec![sync.render_finished.handle()],
        };
        self.ctx
            .device()
            .queue_submit(self.ctx.graphics_queue(), &submit, sync.in_flight.handle())
            .at_call_site()?;

        let present = PresentDesc {
            wait: vec![sync.render_finished.handle()],
            swapchain: self.swapchain.swapchain_handle()?,
            image_index,
        };
        let stale = match self.ctx.device().queue_present(self.ctx.present_queue(), &present).at_call_site() {
            Ok(suboptimal) => suboptimal,
            Err(e) if e.is_out_of_date() => true,
            Err(e) => return Err(e),
        };
        self.frame_counter += 1;

        if stale || self.resize_pending {
            log::warn!("Swapchain stale after present, recreating");
            self.recreate_swapchain()?;
        }
        Ok(stats)
    }

    /// Block until the device has finished all submitted work
    pub fn shutdown(&self) -> VulkanResult<()> {
        self.ctx.wait_idle()
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("Device wait idle failed while dropping frame loop: {e}");
        }
    }
}

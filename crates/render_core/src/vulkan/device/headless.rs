//! Headless software device
//!
//! Implements [`GpuDevice`] entirely on the host. Handles are unique,
//! monotonically increasing integers that are never reused; memory is plain
//! host bytes; buffer and image copies execute when their submission
//! completes. Submissions either complete immediately or wait until the
//! owner calls [`HeadlessDevice::complete_next_submission`], which lets tests
//! observe exactly what the CPU does while GPU work is outstanding.

use ash::vk::{self, Handle};
use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{
    BufferImageCopy, DescriptorBinding, DescriptorWrite, GpuDevice, GraphicsPipelineDesc, ImageBarrier, ImageDesc,
    ImageViewDesc, PresentDesc, RenderPassBegin, RenderPassDesc, SamplerDesc, SubmitDesc, SwapchainDesc,
};
use crate::vk_error;
use crate::vulkan::error::VulkanResult;

const QUEUE_HANDLE_BASE: u64 = 1 << 48;

/// Descriptor writes kept for inspection; older ones are dropped first
pub const MAX_RECORDED_DESCRIPTOR_WRITES: usize = 1024;

/// Kind of object behind a live handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// `VkBuffer`
    Buffer,
    /// `VkImage` created by the application
    Image,
    /// `VkImage` owned by a swapchain
    SwapchainImage,
    /// `VkDeviceMemory`
    Memory,
    /// `VkImageView`
    ImageView,
    /// `VkSampler`
    Sampler,
    /// `VkCommandPool`
    CommandPool,
    /// `VkCommandBuffer`
    CommandBuffer,
    /// `VkFence`
    Fence,
    /// `VkSemaphore`
    Semaphore,
    /// `VkDescriptorSetLayout`
    DescriptorSetLayout,
    /// `VkDescriptorPool`
    DescriptorPool,
    /// `VkDescriptorSet`
    DescriptorSet,
    /// `VkShaderModule`
    ShaderModule,
    /// `VkPipelineLayout`
    PipelineLayout,
    /// `VkRenderPass`
    RenderPass,
    /// `VkPipeline`
    Pipeline,
    /// `VkFramebuffer`
    Framebuffer,
    /// `VkSwapchainKHR`
    Swapchain,
}

/// Command captured from a command buffer
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    /// Buffer to buffer copy
    CopyBuffer {
        /// Source buffer
        src: vk::Buffer,
        /// Destination buffer
        dst: vk::Buffer,
        /// Copy regions
        regions: Vec<vk::BufferCopy>,
    },
    /// Buffer to image copy
    CopyBufferToImage {
        /// Source buffer
        src: vk::Buffer,
        /// Destination image
        dst: vk::Image,
        /// Layout of the destination image
        layout: vk::ImageLayout,
        /// Copy regions
        regions: Vec<BufferImageCopy>,
    },
    /// Image layout barrier
    PipelineBarrier {
        /// Source stage
        src_stage: vk::PipelineStageFlags,
        /// Destination stage
        dst_stage: vk::PipelineStageFlags,
        /// Barrier parameters
        barrier: ImageBarrier,
    },
    /// Render pass begin
    BeginRenderPass(RenderPassBegin),
    /// Render pass end
    EndRenderPass,
    /// Pipeline bind
    BindPipeline(vk::Pipeline),
    /// Descriptor set bind
    BindDescriptorSets {
        /// First set index
        first_set: u32,
        /// Sets bound
        sets: Vec<vk::DescriptorSet>,
    },
    /// Vertex buffer bind
    BindVertexBuffer(vk::Buffer),
    /// Index buffer bind
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    /// Push constant update
    PushConstants {
        /// Stages receiving the constants
        stages: vk::ShaderStageFlags,
        /// Byte offset
        offset: u32,
        /// Pushed bytes
        data: Vec<u8>,
    },
    /// Indexed draw
    DrawIndexed {
        /// Number of indices
        index_count: u32,
        /// First index
        first_index: u32,
        /// Vertex offset
        vertex_offset: i32,
    },
    /// Dynamic viewport
    SetViewport(vk::Viewport),
    /// Dynamic scissor
    SetScissor(vk::Rect2D),
}

/// Construction parameters of a [`HeadlessDevice`]
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Property flags of each memory type
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Initial surface extent
    pub surface_extent: vk::Extent2D,
    /// Minimum swapchain image count reported by the surface
    pub min_image_count: u32,
    /// Maximum swapchain image count, zero for unbounded
    pub max_image_count: u32,
    /// Formats reported by the surface
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    /// Present modes reported by the surface
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Complete submissions as soon as they are queued
    pub auto_complete: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL
                    | vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            surface_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_count: 2,
            max_image_count: 3,
            surface_formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            auto_complete: true,
        }
    }
}

struct MemoryBlock {
    bytes: Box<[u8]>,
    type_index: u32,
    mapped: bool,
}

struct BufferInfo {
    size: u64,
    memory: Option<u64>,
}

struct ImageInfo {
    desc: ImageDesc,
    memory: Option<u64>,
}

struct CommandBufferInfo {
    pool: u64,
    commands: Vec<RecordedCommand>,
    recording: bool,
}

struct SwapchainInfo {
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    next_image: u32,
}

struct Submission {
    command_buffers: Vec<vk::CommandBuffer>,
    fence: vk::Fence,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    buffers: HashMap<u64, BufferInfo>,
    images: HashMap<u64, ImageInfo>,
    memory: HashMap<u64, MemoryBlock>,
    views: HashMap<u64, ImageViewDesc>,
    framebuffers: HashMap<u64, vk::Extent2D>,
    command_buffers: HashMap<u64, CommandBufferInfo>,
    descriptor_sets: HashMap<u64, u64>,
    fences: HashMap<u64, bool>,
    swapchains: HashMap<u64, SwapchainInfo>,
    descriptor_writes: VecDeque<DescriptorWrite>,
    pending: VecDeque<Submission>,
    submitted: u64,
    completed: u64,
    presented: u64,
    peak_in_flight: usize,
    invalid_frees: usize,
    surface_extent: vk::Extent2D,
    present_suboptimal: bool,
    acquire_suboptimal: bool,
    acquire_timeout: bool,
    fail_next_allocation: bool,
}

impl State {
    fn register(&mut self, kind: ObjectKind) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        self.next_handle
    }

    fn release(&mut self, raw: u64, kind: ObjectKind) -> bool {
        match self.live.get(&raw) {
            Some(live_kind) if *live_kind == kind => {
                self.live.remove(&raw);
                true
            }
            _ => {
                log::warn!("Headless device: release of unknown {kind:?} handle {raw:#x}");
                self.invalid_frees += 1;
                false
            }
        }
    }

    fn execute(&mut self, submission: &Submission) {
        for cb in &submission.command_buffers {
            let commands = self
                .command_buffers
                .get(&cb.as_raw())
                .map(|info| info.commands.clone())
                .unwrap_or_default();
            for command in &commands {
                match command {
                    RecordedCommand::CopyBuffer { src, dst, regions } => {
                        let src_memory = self.buffers.get(&src.as_raw()).and_then(|b| b.memory);
                        let dst_memory = self.buffers.get(&dst.as_raw()).and_then(|b| b.memory);
                        if let (Some(src_memory), Some(dst_memory)) = (src_memory, dst_memory) {
                            for region in regions {
                                self.copy_bytes(src_memory, region.src_offset, dst_memory, region.dst_offset, region.size);
                            }
                        }
                    }
                    RecordedCommand::CopyBufferToImage { src, dst, regions, .. } => {
                        let src_memory = self.buffers.get(&src.as_raw()).and_then(|b| b.memory);
                        let dst_memory = self.images.get(&dst.as_raw()).and_then(|i| i.memory);
                        if let (Some(src_memory), Some(dst_memory)) = (src_memory, dst_memory) {
                            for region in regions {
                                let layer_bytes = u64::from(region.extent.width)
                                    * u64::from(region.extent.height)
                                    * u64::from(region.extent.depth)
                                    * TEXEL_SIZE;
                                self.copy_bytes(
                                    src_memory,
                                    region.buffer_offset,
                                    dst_memory,
                                    u64::from(region.base_array_layer) * layer_bytes,
                                    layer_bytes * u64::from(region.layer_count),
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        if submission.fence != vk::Fence::null() {
            self.fences.insert(submission.fence.as_raw(), true);
        }
        self.completed += 1;
    }

    fn copy_bytes(&mut self, src: u64, src_offset: u64, dst: u64, dst_offset: u64, size: u64) {
        let Some(bytes) = self.memory.get(&src).and_then(|block| {
            let start = usize::try_from(src_offset).ok()?;
            let end = start.checked_add(usize::try_from(size).ok()?)?;
            block.bytes.get(start..end).map(<[u8]>::to_vec)
        }) else {
            log::warn!("Headless device: copy source range out of bounds");
            return;
        };
        let Some(target) = self.memory.get_mut(&dst).and_then(|block| {
            let start = usize::try_from(dst_offset).ok()?;
            block.bytes.get_mut(start..start + bytes.len())
        }) else {
            log::warn!("Headless device: copy destination range out of bounds");
            return;
        };
        target.copy_from_slice(&bytes);
    }
}

const TEXEL_SIZE: u64 = 4;

const fn same_extent(a: vk::Extent2D, b: vk::Extent2D) -> bool {
    a.width == b.width && a.height == b.height
}

/// Deterministic host-side implementation of [`GpuDevice`]
pub struct HeadlessDevice {
    config: HeadlessConfig,
    state: Mutex<State>,
    completion: Condvar,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessDevice {
    /// Create a device from a configuration
    pub fn new(config: HeadlessConfig) -> Self {
        let state = State { surface_extent: config.surface_extent, ..State::default() };
        Self { config, state: Mutex::new(state), completion: Condvar::new() }
    }

    /// Create a device whose submissions stay pending until completed by hand
    pub fn manual() -> Self {
        Self::new(HeadlessConfig { auto_complete: false, ..HeadlessConfig::default() })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, cb: vk::CommandBuffer, command: RecordedCommand) {
        if let Some(info) = self.state().command_buffers.get_mut(&cb.as_raw()) {
            info.commands.push(command);
        }
    }

    fn create<H: Handle>(&self, kind: ObjectKind) -> H {
        H::from_raw(self.state().register(kind))
    }

    /// Whether a handle refers to a live object
    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state().live.contains_key(&handle.as_raw())
    }

    /// Number of live objects of every kind
    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }

    /// Number of live objects of one kind
    pub fn live_count_of(&self, kind: ObjectKind) -> usize {
        self.state().live.values().filter(|k| **k == kind).count()
    }

    /// Destroy or free calls that named an unknown handle
    pub fn invalid_frees(&self) -> usize {
        self.state().invalid_frees
    }

    /// Commands recorded since the last begin of a command buffer
    pub fn recorded_commands(&self, cb: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state()
            .command_buffers
            .get(&cb.as_raw())
            .map(|info| info.commands.clone())
            .unwrap_or_default()
    }

    /// Contents of the memory bound to a buffer
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let state = self.state();
        let memory = state.buffers.get(&buffer.as_raw())?.memory?;
        state.memory.get(&memory).map(|block| block.bytes.to_vec())
    }

    /// Contents of the memory bound to an image
    pub fn image_contents(&self, image: vk::Image) -> Option<Vec<u8>> {
        let state = self.state();
        let memory = state.images.get(&image.as_raw())?.memory?;
        state.memory.get(&memory).map(|block| block.bytes.to_vec())
    }

    /// Memory type index of an allocation
    pub fn memory_type_of(&self, memory: vk::DeviceMemory) -> Option<u32> {
        self.state().memory.get(&memory.as_raw()).map(|block| block.type_index)
    }

    /// Extent of an application or swapchain image
    pub fn image_extent(&self, image: vk::Image) -> Option<vk::Extent3D> {
        self.state().images.get(&image.as_raw()).map(|info| info.desc.extent)
    }

    /// Description an image view was created with
    pub fn view_desc(&self, view: vk::ImageView) -> Option<ImageViewDesc> {
        self.state().views.get(&view.as_raw()).copied()
    }

    /// Image an image view refers to
    pub fn view_image(&self, view: vk::ImageView) -> Option<vk::Image> {
        self.state().views.get(&view.as_raw()).map(|desc| desc.image)
    }

    /// Extent a framebuffer was created with
    pub fn framebuffer_extent(&self, framebuffer: vk::Framebuffer) -> Option<vk::Extent2D> {
        self.state().framebuffers.get(&framebuffer.as_raw()).copied()
    }

    /// Descriptor writes applied so far
    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state().descriptor_writes.iter().copied().collect()
    }

    /// Complete the oldest pending submission, returning whether one existed
    pub fn complete_next_submission(&self) -> bool {
        let mut state = self.state();
        let Some(submission) = state.pending.pop_front() else {
            return false;
        };
        state.execute(&submission);
        drop(state);
        self.completion.notify_all();
        true
    }

    /// Complete every pending submission, returning how many completed
    pub fn complete_all_submissions(&self) -> usize {
        let mut completed = 0;
        while self.complete_next_submission() {
            completed += 1;
        }
        completed
    }

    /// Submissions queued but not completed
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    /// Largest number of submissions that were pending at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }

    /// Total submissions queued
    pub fn submitted_count(&self) -> u64 {
        self.state().submitted
    }

    /// Total submissions completed
    pub fn completed_count(&self) -> u64 {
        self.state().completed
    }

    /// Total successful presents
    pub fn presented_count(&self) -> u64 {
        self.state().presented
    }

    /// Change the surface extent; swapchains of another extent become out of date
    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state().surface_extent = extent;
    }

    /// Make presents report a suboptimal swapchain
    pub fn set_present_suboptimal(&self, suboptimal: bool) {
        self.state().present_suboptimal = suboptimal;
    }

    /// Make acquires report a suboptimal swapchain
    pub fn set_acquire_suboptimal(&self, suboptimal: bool) {
        self.state().acquire_suboptimal = suboptimal;
    }

    /// Make acquires time out without returning an image
    pub fn set_acquire_timeout(&self, timeout: bool) {
        self.state().acquire_timeout = timeout;
    }

    /// Fail the next memory allocation with `ERROR_OUT_OF_DEVICE_MEMORY`
    pub fn fail_next_allocation(&self) {
        self.state().fail_next_allocation = true;
    }
}

impl GpuDevice for HeadlessDevice {
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        self.config.memory_types.clone()
    }

    fn create_buffer(&self, size: u64, _usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        if size == 0 {
            return Err(vk_error!("vkCreateBuffer", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let mut state = self.state();
        let raw = state.register(ObjectKind::Buffer);
        state.buffers.insert(raw, BufferInfo { size, memory: None });
        Ok(vk::Buffer::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        if state.release(buffer.as_raw(), ObjectKind::Buffer) {
            state.buffers.remove(&buffer.as_raw());
        }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self.state().buffers.get(&buffer.as_raw()).map_or(0, |info| info.size);
        vk::MemoryRequirements {
            size,
            alignment: 16,
            memory_type_bits: (1u32 << self.config.memory_types.len()) - 1,
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let mut state = self.state();
        let raw = state.register(ObjectKind::Image);
        state.images.insert(raw, ImageInfo { desc: *desc, memory: None });
        Ok(vk::Image::from_raw(raw))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        if state.release(image.as_raw(), ObjectKind::Image) {
            state.images.remove(&image.as_raw());
        }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self.state().images.get(&image.as_raw()).map_or(0, |info| {
            let e = info.desc.extent;
            u64::from(e.width) * u64::from(e.height) * u64::from(e.depth) * u64::from(info.desc.array_layers) * TEXEL_SIZE
        });
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: (1u32 << self.config.memory_types.len()) - 1,
        }
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_allocation) {
            return Err(vk_error!("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        if memory_type_index as usize >= self.config.memory_types.len() {
            return Err(vk_error!("vkAllocateMemory", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let len = usize::try_from(size)
            .map_err(|_| vk_error!("vkAllocateMemory", vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;
        let raw = state.register(ObjectKind::Memory);
        state.memory.insert(
            raw,
            MemoryBlock { bytes: vec![0; len].into_boxed_slice(), type_index: memory_type_index, mapped: false },
        );
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        if state.release(memory.as_raw(), ObjectKind::Memory) {
            state.memory.remove(&memory.as_raw());
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()> {
        let mut state = self.state();
        let available = state.memory.get(&memory.as_raw()).map(|block| block.bytes.len() as u64);
        let info = state.buffers.get_mut(&buffer.as_raw());
        match (info, available) {
            (Some(info), Some(available)) if info.memory.is_none() && available >= info.size => {
                info.memory = Some(memory.as_raw());
                Ok(())
            }
            _ => Err(vk_error!("vkBindBufferMemory", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()> {
        let mut state = self.state();
        if !state.memory.contains_key(&memory.as_raw()) {
            return Err(vk_error!("vkBindImageMemory", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        match state.images.get_mut(&image.as_raw()) {
            Some(info) if info.memory.is_none() => {
                info.memory = Some(memory.as_raw());
                Ok(())
            }
            _ => Err(vk_error!("vkBindImageMemory", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> VulkanResult<*mut c_void> {
        let mut state = self.state();
        let block = state
            .memory
            .get_mut(&memory.as_raw())
            .ok_or_else(|| vk_error!("vkMapMemory", vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let host_visible = self
            .config
            .memory_types
            .get(block.type_index as usize)
            .is_some_and(|flags| flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        let in_range = offset.checked_add(size).is_some_and(|end| end <= block.bytes.len() as u64);
        if !host_visible || block.mapped || !in_range {
            return Err(vk_error!("vkMapMemory", vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        block.mapped = true;
        let offset = usize::try_from(offset).map_err(|_| vk_error!("vkMapMemory", vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        Ok(block.bytes[offset..].as_mut_ptr().cast())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        if let Some(block) = self.state().memory.get_mut(&memory.as_raw()) {
            block.mapped = false;
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let mut state = self.state();
        if !state.live.contains_key(&desc.image.as_raw()) {
            return Err(vk_error!("vkCreateImageView", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let raw = state.register(ObjectKind::ImageView);
        state.views.insert(raw, *desc);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state();
        if state.release(view.as_raw(), ObjectKind::ImageView) {
            state.views.remove(&view.as_raw());
        }
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        Ok(self.create(ObjectKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().release(sampler.as_raw(), ObjectKind::Sampler);
    }

    fn create_command_pool(&self, _queue_family: u32) -> VulkanResult<vk::CommandPool> {
        Ok(self.create(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        if state.release(pool.as_raw(), ObjectKind::CommandPool) {
            let owned: Vec<u64> = state
                .command_buffers
                .iter()
                .filter(|(_, info)| info.pool == pool.as_raw())
                .map(|(raw, _)| *raw)
                .collect();
            for raw in owned {
                state.command_buffers.remove(&raw);
                state.live.remove(&raw);
            }
        }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        if state.live.get(&pool.as_raw()) != Some(&ObjectKind::CommandPool) {
            return Err(vk_error!("vkAllocateCommandBuffers", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        Ok((0..count)
            .map(|_| {
                let raw = state.register(ObjectKind::CommandBuffer);
                state
                    .command_buffers
                    .insert(raw, CommandBufferInfo { pool: pool.as_raw(), commands: Vec::new(), recording: false });
                vk::CommandBuffer::from_raw(raw)
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for cb in buffers {
            if state.release(cb.as_raw(), ObjectKind::CommandBuffer) {
                state.command_buffers.remove(&cb.as_raw());
            }
        }
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, _flags: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        match self.state().command_buffers.get_mut(&cb.as_raw()) {
            Some(info) if !info.recording => {
                info.commands.clear();
                info.recording = true;
                Ok(())
            }
            _ => Err(vk_error!("vkBeginCommandBuffer", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VulkanResult<()> {
        match self.state().command_buffers.get_mut(&cb.as_raw()) {
            Some(info) if info.recording => {
                info.recording = false;
                Ok(())
            }
            _ => Err(vk_error!("vkEndCommandBuffer", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> VulkanResult<()> {
        match self.state().command_buffers.get_mut(&cb.as_raw()) {
            Some(info) => {
                info.commands.clear();
                info.recording = false;
                Ok(())
            }
            None => Err(vk_error!("vkResetCommandBuffer", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn cmd_copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.record(cb, RecordedCommand::CopyBuffer { src, dst, regions: regions.to_vec() });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        self.record(cb, RecordedCommand::CopyBufferToImage { src, dst, layout, regions: regions.to_vec() });
    }

    fn cmd_pipeline_barrier(
        &self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &ImageBarrier,
    ) {
        self.record(cb, RecordedCommand::PipelineBarrier { src_stage, dst_stage, barrier: *barrier });
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.record(cb, RecordedCommand::BeginRenderPass(*begin));
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) {
        self.record(cb, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(cb, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(cb, RecordedCommand::BindDescriptorSets { first_set, sets: sets.to_vec() });
    }

    fn cmd_bind_vertex_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, _offset: u64) {
        self.record(cb, RecordedCommand::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, _offset: u64, index_type: vk::IndexType) {
        self.record(cb, RecordedCommand::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_push_constants(
        &self,
        cb: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(cb, RecordedCommand::PushConstants { stages, offset, data: data.to_vec() });
    }

    fn cmd_draw_indexed(&self, cb: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.record(cb, RecordedCommand::DrawIndexed { index_count, first_index, vertex_offset });
    }

    fn cmd_set_viewport(&self, cb: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(cb, RecordedCommand::SetViewport(viewport));
    }

    fn cmd_set_scissor(&self, cb: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(cb, RecordedCommand::SetScissor(scissor));
    }

    fn queue(&self, family: u32, _index: u32) -> vk::Queue {
        vk::Queue::from_raw(QUEUE_HANDLE_BASE + u64::from(family))
    }

    fn queue_submit(&self, _queue: vk::Queue, submit: &SubmitDesc, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state();
        for cb in &submit.command_buffers {
            match state.command_buffers.get(&cb.as_raw()) {
                Some(info) if !info.recording => {}
                _ => return Err(vk_error!("vkQueueSubmit", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
            }
        }
        if fence != vk::Fence::null() {
            match state.fences.get(&fence.as_raw()) {
                Some(false) => {}
                _ => return Err(vk_error!("vkQueueSubmit", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
            }
        }
        let submission = Submission { command_buffers: submit.command_buffers.clone(), fence };
        state.submitted += 1;
        if self.config.auto_complete {
            state.peak_in_flight = state.peak_in_flight.max(1);
            state.execute(&submission);
            drop(state);
            self.completion.notify_all();
        } else {
            state.pending.push_back(submission);
            state.peak_in_flight = state.peak_in_flight.max(state.pending.len());
        }
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VulkanResult<()> {
        self.complete_all_submissions();
        Ok(())
    }

    fn device_wait_idle(&self) -> VulkanResult<()> {
        self.complete_all_submissions();
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.register(ObjectKind::Fence);
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if state.release(fence.as_raw(), ObjectKind::Fence) {
            state.fences.remove(&fence.as_raw());
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<bool> {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        let mut state = self.state();
        loop {
            match state.fences.get(&fence.as_raw()) {
                Some(true) => return Ok(true),
                Some(false) => {}
                None => return Err(vk_error!("vkWaitForFences", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.completion
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.completion.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        match self.state().fences.get_mut(&fence.as_raw()) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk_error!("vkResetFences", vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool> {
        self.state()
            .fences
            .get(&fence.as_raw())
            .copied()
            .ok_or_else(|| vk_error!("vkGetFenceStatus", vk::Result::ERROR_VALIDATION_FAILED_EXT))
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(self.create(ObjectKind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().release(semaphore.as_raw(), ObjectKind::Semaphore);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(self.create(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state().release(layout.as_raw(), ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(&self, _max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        Ok(self.create(ObjectKind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        if state.release(pool.as_raw(), ObjectKind::DescriptorPool) {
            let owned: Vec<u64> = state
                .descriptor_sets
                .iter()
                .filter(|(_, owner)| **owner == pool.as_raw())
                .map(|(raw, _)| *raw)
                .collect();
            for raw in owned {
                state.descriptor_sets.remove(&raw);
                state.live.remove(&raw);
            }
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        if state.live.get(&pool.as_raw()) != Some(&ObjectKind::DescriptorPool) {
            return Err(vk_error!("vkAllocateDescriptorSets", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        Ok(layouts
            .iter()
            .map(|_| {
                let raw = state.register(ObjectKind::DescriptorSet);
                state.descriptor_sets.insert(raw, pool.as_raw());
                vk::DescriptorSet::from_raw(raw)
            })
            .collect())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        state.descriptor_writes.extend(writes.iter().copied());
        let excess = state.descriptor_writes.len().saturating_sub(MAX_RECORDED_DESCRIPTOR_WRITES);
        state.descriptor_writes.drain(..excess);
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(vk_error!("vkCreateShaderModule", vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        Ok(self.create(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state().release(module.as_raw(), ObjectKind::ShaderModule);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        Ok(self.create(ObjectKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state().release(layout.as_raw(), ObjectKind::PipelineLayout);
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        Ok(self.create(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().release(render_pass.as_raw(), ObjectKind::RenderPass);
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline> {
        Ok(self.create(ObjectKind::Pipeline))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().release(pipeline.as_raw(), ObjectKind::Pipeline);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let mut state = self.state();
        if attachments.iter().any(|view| !state.views.contains_key(&view.as_raw())) {
            return Err(vk_error!("vkCreateFramebuffer", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let raw = state.register(ObjectKind::Framebuffer);
        state.framebuffers.insert(raw, extent);
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state();
        if state.release(framebuffer.as_raw(), ObjectKind::Framebuffer) {
            state.framebuffers.remove(&framebuffer.as_raw());
        }
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        let extent = self.state().surface_extent;
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: self.config.min_image_count,
            max_image_count: self.config.max_image_count,
            current_extent: extent,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        })
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.config.surface_formats.clone())
    }

    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        Ok(self.config.present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR> {
        let mut state = self.state();
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(vk_error!("vkCreateSwapchainKHR", vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let raw = state.register(ObjectKind::Swapchain);
        let images = (0..desc.min_image_count)
            .map(|_| {
                let image = state.register(ObjectKind::SwapchainImage);
                state.images.insert(
                    image,
                    ImageInfo {
                        desc: ImageDesc {
                            extent: vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 },
                            format: desc.format.format,
                            tiling: vk::ImageTiling::OPTIMAL,
                            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                            mip_levels: 1,
                            array_layers: 1,
                            flags: vk::ImageCreateFlags::empty(),
                        },
                        memory: None,
                    },
                );
                vk::Image::from_raw(image)
            })
            .collect();
        state.swapchains.insert(raw, SwapchainInfo { images, extent: desc.extent, next_image: 0 });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|info| info.images.clone())
            .ok_or_else(|| vk_error!("vkGetSwapchainImagesKHR", vk::Result::ERROR_VALIDATION_FAILED_EXT))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        if state.release(swapchain.as_raw(), ObjectKind::Swapchain) {
            if let Some(info) = state.swapchains.remove(&swapchain.as_raw()) {
                for image in info.images {
                    state.images.remove(&image.as_raw());
                    state.live.remove(&image.as_raw());
                }
            }
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _semaphore: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        let mut state = self.state();
        let surface_extent = state.surface_extent;
        let suboptimal = state.acquire_suboptimal;
        if state.acquire_timeout {
            return Err(vk_error!("vkAcquireNextImageKHR", vk::Result::TIMEOUT));
        }
        let info = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or_else(|| vk_error!("vkAcquireNextImageKHR", vk::Result::ERROR_VALIDATION_FAILED_EXT))?;
        if !same_extent(info.extent, surface_extent) {
            return Err(vk_error!("vkAcquireNextImageKHR", vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        let index = info.next_image;
        info.next_image = (index + 1) % info.images.len() as u32;
        Ok((index, suboptimal))
    }

    fn queue_present(&self, _queue: vk::Queue, present: &PresentDesc) -> VulkanResult<bool> {
        let mut state = self.state();
        let surface_extent = state.surface_extent;
        let extent = state
            .swapchains
            .get(&present.swapchain.as_raw())
            .map(|info| info.extent)
            .ok_or_else(|| vk_error!("vkQueuePresentKHR", vk::Result::ERROR_VALIDATION_FAILED_EXT))?;
        if !same_extent(extent, surface_extent) {
            return Err(vk_error!("vkQueuePresentKHR", vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        state.presented += 1;
        Ok(state.present_suboptimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_tracked() {
        let device = HeadlessDevice::default();
        let a = device.create_fence(false).unwrap();
        let b = device.create_fence(true).unwrap();
        assert_ne!(a, b);
        assert!(device.is_live(a));
        device.destroy_fence(a);
        assert!(!device.is_live(a));
        assert!(device.is_live(b));
        device.destroy_fence(a);
        assert_eq!(device.invalid_frees(), 1);
    }

    #[test]
    fn test_manual_submission_signals_fence_on_completion() {
        let device = HeadlessDevice::manual();
        let fence = device.create_fence(false).unwrap();
        device.queue_submit(device.queue(0, 0), &SubmitDesc::default(), fence).unwrap();
        assert!(!device.fence_status(fence).unwrap());
        assert!(!device.wait_for_fence(fence, 1_000_000).unwrap());
        assert!(device.complete_next_submission());
        assert!(device.wait_for_fence(fence, 0).unwrap());
    }

    #[test]
    fn test_submit_with_signaled_fence_is_rejected() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(true).unwrap();
        let err = device.queue_submit(device.queue(0, 0), &SubmitDesc::default(), fence).unwrap_err();
        assert_eq!(err.result(), Some(vk::Result::ERROR_VALIDATION_FAILED_EXT));
    }

    #[test]
    fn test_map_requires_host_visible_memory() {
        let device = HeadlessDevice::default();
        let device_local = device.allocate_memory(64, 0).unwrap();
        assert!(device.map_memory(device_local, 0, 64).is_err());
        let host_visible = device.allocate_memory(64, 1).unwrap();
        assert!(device.map_memory(host_visible, 0, 64).is_ok());
        assert!(device.map_memory(host_visible, 0, 64).is_err());
        device.unmap_memory(host_visible);
        assert!(device.map_memory(host_visible, 0, 64).is_ok());
    }

    #[test]
    fn test_resized_surface_makes_acquire_out_of_date() {
        let device = HeadlessDevice::default();
        let swapchain = device
            .create_swapchain(&SwapchainDesc {
                min_image_count: 3,
                format: device.surface_formats().unwrap()[0],
                extent: vk::Extent2D { width: 800, height: 600 },
                present_mode: vk::PresentModeKHR::FIFO,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                queue_family_indices: vec![0],
            })
            .unwrap();
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(device.acquire_next_image(swapchain, 0, semaphore).unwrap(), (0, false));
        assert_eq!(device.acquire_next_image(swapchain, 0, semaphore).unwrap(), (1, false));
        device.set_surface_extent(vk::Extent2D { width: 1024, height: 768 });
        let err = device.acquire_next_image(swapchain, 0, semaphore).unwrap_err();
        assert!(err.is_out_of_date());
    }

    #[test]
    fn test_descriptor_write_log_is_bounded() {
        let device = HeadlessDevice::default();
        let write = |binding| DescriptorWrite::UniformBuffer {
            set: vk::DescriptorSet::null(),
            binding,
            buffer: vk::Buffer::null(),
            range: 64,
        };
        for binding in 0..(MAX_RECORDED_DESCRIPTOR_WRITES as u32 + 10) {
            device.update_descriptor_sets(&[write(binding)]);
        }
        let writes = device.descriptor_writes();
        assert_eq!(writes.len(), MAX_RECORDED_DESCRIPTOR_WRITES);
        assert_eq!(writes[0], write(10));
        assert_eq!(writes.last(), Some(&write(MAX_RECORDED_DESCRIPTOR_WRITES as u32 + 9)));
    }
}

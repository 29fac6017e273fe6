//! Logical device abstraction
//!
//! [`GpuDevice`] is the narrow surface through which the rest of the core
//! talks to the GPU. [`AshDevice`] forwards to the native driver;
//! [`HeadlessDevice`] is a deterministic software device that executes
//! transfers on the host and lets tests drive fence completion by hand.
//!
//! Parameters use `ash::vk` handle and flag types, but never structs carrying
//! `p_next` chains, so descriptions can be stored and inspected freely.

pub mod headless;
pub mod native;

pub use headless::{HeadlessConfig, HeadlessDevice, RecordedCommand};
pub use native::AshDevice;

use ash::vk;
use std::ffi::c_void;

use super::error::VulkanResult;

/// Description of an image to create
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Texel extent
    pub extent: vk::Extent3D,
    /// Texel format
    pub format: vk::Format,
    /// Memory tiling
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Number of array layers
    pub array_layers: u32,
    /// Creation flags, e.g. `CUBE_COMPATIBLE`
    pub flags: vk::ImageCreateFlags,
}

/// Description of an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageViewDesc {
    /// Image the view refers to
    pub image: vk::Image,
    /// View dimensionality
    pub view_type: vk::ImageViewType,
    /// View format
    pub format: vk::Format,
    /// Aspect covered by the view
    pub aspect: vk::ImageAspectFlags,
    /// Mip levels covered by the view
    pub mip_levels: u32,
    /// Array layers covered by the view
    pub layer_count: u32,
}

/// Description of a sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Addressing mode for all three coordinates
    pub address_mode: vk::SamplerAddressMode,
    /// Anisotropy level, `None` disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
}

/// Image layout barrier recorded into a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image being transitioned
    pub image: vk::Image,
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Access made available
    pub src_access: vk::AccessFlags,
    /// Access made visible
    pub dst_access: vk::AccessFlags,
    /// Aspect covered
    pub aspect: vk::ImageAspectFlags,
    /// Mip levels covered
    pub mip_levels: u32,
    /// Array layers covered
    pub layer_count: u32,
}

/// Buffer to image copy region
#[derive(Debug, Clone, Copy)]
pub struct BufferImageCopy {
    /// Byte offset into the source buffer
    pub buffer_offset: u64,
    /// Aspect of the destination image
    pub aspect: vk::ImageAspectFlags,
    /// First array layer written
    pub base_array_layer: u32,
    /// Number of array layers written
    pub layer_count: u32,
    /// Extent written
    pub extent: vk::Extent3D,
}

/// Clear values for the color and depth attachments of a render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    /// RGBA clear color
    pub color: [f32; 4],
    /// Depth clear value
    pub depth: f32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self { color: [0.0, 0.0, 0.0, 1.0], depth: 1.0 }
    }
}

/// Render pass begin parameters
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    /// Render pass to begin
    pub render_pass: vk::RenderPass,
    /// Target framebuffer
    pub framebuffer: vk::Framebuffer,
    /// Render area, anchored at the origin
    pub extent: vk::Extent2D,
    /// Attachment clear values
    pub clear: ClearValues,
}

/// Work submitted to a queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitDesc {
    /// Semaphores waited on, with the stage that waits
    pub wait: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    /// Command buffers executed in order
    pub command_buffers: Vec<vk::CommandBuffer>,
    /// Semaphores signaled on completion
    pub signal: Vec<vk::Semaphore>,
}

/// Presentation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentDesc {
    /// Semaphores waited on before presenting
    pub wait: Vec<vk::Semaphore>,
    /// Swapchain owning the image
    pub swapchain: vk::SwapchainKHR,
    /// Index of the image to present
    pub image_index: u32,
}

/// Swapchain creation parameters
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    /// Number of presentable images requested
    pub min_image_count: u32,
    /// Surface format
    pub format: vk::SurfaceFormatKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Surface transform, normally the current transform
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Queue families sharing the images; more than one means concurrent sharing
    pub queue_family_indices: Vec<u32>,
}

/// Attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Attachment format
    pub format: vk::Format,
    /// Load operation
    pub load_op: vk::AttachmentLoadOp,
    /// Store operation
    pub store_op: vk::AttachmentStoreOp,
    /// Layout at render pass begin
    pub initial_layout: vk::ImageLayout,
    /// Layout at render pass end
    pub final_layout: vk::ImageLayout,
}

/// Single-subpass render pass with one color and an optional depth attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Color attachment, bound at location 0
    pub color: AttachmentDesc,
    /// Depth attachment
    pub depth: Option<AttachmentDesc>,
}

/// Descriptor set layout binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding index
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Stages that read the binding
    pub stages: vk::ShaderStageFlags,
}

/// Descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Point a uniform buffer binding at a buffer range
    UniformBuffer {
        /// Set being written
        set: vk::DescriptorSet,
        /// Binding index
        binding: u32,
        /// Buffer bound
        buffer: vk::Buffer,
        /// Byte range
        range: u64,
    },
    /// Point a combined image sampler binding at a view and sampler
    CombinedImageSampler {
        /// Set being written
        set: vk::DescriptorSet,
        /// Binding index
        binding: u32,
        /// Image view bound
        view: vk::ImageView,
        /// Sampler bound
        sampler: vk::Sampler,
    },
}

/// Vertex attribute layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader location
    pub location: u32,
    /// Attribute format
    pub format: vk::Format,
    /// Byte offset within the vertex
    pub offset: u32,
}

/// Graphics pipeline description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    /// Vertex shader module
    pub vertex_shader: vk::ShaderModule,
    /// Fragment shader module
    pub fragment_shader: vk::ShaderModule,
    /// Vertex stride of binding 0
    pub vertex_stride: u32,
    /// Vertex attributes of binding 0
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Front face winding
    pub front_face: vk::FrontFace,
    /// Depth test and write enabled
    pub depth_test: bool,
    /// Alpha blending enabled on the color attachment
    pub alpha_blend: bool,
}

/// Logical GPU device
///
/// Implementations own every object they create until the matching
/// `destroy_*`/`free_*` call. Callers wrap handles in owning types that make
/// those calls on drop.
pub trait GpuDevice: Send + Sync {
    /// Property flags of each memory type, indexed by memory type index
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags>;

    // Buffers, images and memory

    /// Create a buffer with exclusive sharing
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer>;
    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Memory requirements of a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    /// Create an image
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image>;
    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);
    /// Memory requirements of an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// Allocate device memory of a given memory type
    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory>;
    /// Free device memory
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Bind memory to a buffer at offset zero
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()>;
    /// Bind memory to an image at offset zero
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()>;
    /// Map a host-visible allocation
    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> VulkanResult<*mut c_void>;
    /// Unmap a mapped allocation
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    /// Create an image view
    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Command buffers

    /// Create a resettable command pool for a queue family
    fn create_command_pool(&self, queue_family: u32) -> VulkanResult<vk::CommandPool>;
    /// Destroy a command pool and the buffers allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate primary command buffers
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;
    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Begin recording
    fn begin_command_buffer(&self, cb: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> VulkanResult<()>;
    /// Finish recording
    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VulkanResult<()>;
    /// Reset a command buffer to the initial state
    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> VulkanResult<()>;
    /// Record a buffer to buffer copy
    fn cmd_copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    /// Record a buffer to image copy
    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[BufferImageCopy],
    );
    /// Record an image layout barrier
    fn cmd_pipeline_barrier(
        &self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &ImageBarrier,
    );
    /// Begin a render pass with inline contents
    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, begin: &RenderPassBegin);
    /// End the current render pass
    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, pipeline: vk::Pipeline);
    /// Bind graphics descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64);
    /// Bind an index buffer
    fn cmd_bind_index_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType);
    /// Push constant bytes
    fn cmd_push_constants(
        &self,
        cb: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    /// Indexed draw of a single instance
    fn cmd_draw_indexed(&self, cb: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32);
    /// Set the dynamic viewport
    fn cmd_set_viewport(&self, cb: vk::CommandBuffer, viewport: vk::Viewport);
    /// Set the dynamic scissor
    fn cmd_set_scissor(&self, cb: vk::CommandBuffer, scissor: vk::Rect2D);

    // Queues and synchronization

    /// Queue handle for a family
    fn queue(&self, family: u32, index: u32) -> vk::Queue;
    /// Submit work, signaling `fence` on completion
    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc, fence: vk::Fence) -> VulkanResult<()>;
    /// Block until a queue is idle
    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()>;
    /// Block until the whole device is idle
    fn device_wait_idle(&self) -> VulkanResult<()>;
    /// Create a fence
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Wait for a fence; `Ok(false)` means the timeout expired
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<bool>;
    /// Reset a fence to unsignaled
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;
    /// Whether a fence is signaled
    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool>;
    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Descriptors

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a descriptor pool
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate one set per layout
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;
    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // Pipelines

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    /// Create a framebuffer
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Surface and swapchain

    /// Capabilities of the target surface
    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR>;
    /// Formats supported by the target surface
    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>>;
    /// Present modes supported by the target surface
    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>>;
    /// Create a swapchain for the target surface
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR>;
    /// Presentable images owned by a swapchain
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Acquire the next image; the flag reports a suboptimal swapchain
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)>;
    /// Queue an image for presentation; `Ok(true)` reports a suboptimal swapchain
    fn queue_present(&self, queue: vk::Queue, present: &PresentDesc) -> VulkanResult<bool>;
}

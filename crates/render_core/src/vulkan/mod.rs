//! Vulkan backend
//!
//! Low-level wrappers that own every native object the renderer creates.
//! All access to the GPU goes through the [`device::GpuDevice`] seam held by
//! [`DeviceContext`].

pub mod device;
pub mod error;
/// Instance, adapter selection and the logical device context
pub mod initialization;
/// Command recording, render pass and pipeline
pub mod rendering;
/// Memory-backed resources: buffers, images, textures, meshes, descriptors
pub mod resources;
/// Swapchain lifecycle and the frames-in-flight loop
pub mod state;

pub use error::{CallSite, VulkanError, VulkanResult};
pub use initialization::DeviceContext;

pub use device::{GpuDevice, HeadlessConfig, HeadlessDevice};
pub use rendering::{
    commands::{CommandRecorder, OneTimeCommand},
    frame_recorder::{DrawCommand, DrawStats},
    pipeline::{FrameUniforms, GraphicsPipeline, ModelConstants, PipelineLayout, ShaderModule},
    render_pass::RenderPass,
};
pub use resources::{
    buffer::{Buffer, UniformBuffer},
    image::{Image, ImageLayout, ImageSpec},
    mesh::{Mesh, Vertex},
    texture::Texture,
};
pub use state::{
    frame_loop::{FrameBegin, FrameContext, FrameLoop, FrameLoopSettings},
    swapchain_manager::SwapchainManager,
    sync::{Fence, FrameSync, Semaphore},
};

//! Renderer facade
//!
//! Owns every GPU object the application creates and hands out `slotmap`
//! handles for them. Asset loaders only see the resource-creation calls
//! (`create_buffer`, `create_image`, `load_texture`, `create_mesh`); the
//! scene layer only sees the frame boundary (`begin_frame`,
//! `update_uniform`, `record_draw`, `end_frame`).

use ash::vk;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

use crate::config::RendererConfig;
use crate::scene::Drawable;
use crate::vulkan::device::ClearValues;
use crate::vulkan::error::{VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::rendering::frame_recorder::{DrawCommand, DrawStats};
use crate::vulkan::rendering::pipeline::{FrameUniforms, GraphicsPipeline, PipelineLayout, ShaderModule};
use crate::vulkan::resources::buffer::{Buffer, UniformBuffer};
use crate::vulkan::resources::descriptors::{DescriptorPool, DescriptorSetLayout};
use crate::vulkan::resources::image::{Image, ImageSpec};
use crate::vulkan::resources::mesh::{Mesh, Vertex};
use crate::vulkan::resources::texture::Texture;
use crate::vulkan::state::frame_loop::{FrameBegin, FrameContext, FrameLoop, FrameLoopSettings, PipelineBinding};
use crate::vulkan::state::swapchain_manager::SwapchainManager;

new_key_type! {
    /// Handle to a buffer created through [`Renderer::create_buffer`]
    pub struct BufferHandle;
    /// Handle to an image created through [`Renderer::create_image`]
    pub struct ImageHandle;
    /// Handle to a sampled texture
    pub struct TextureHandle;
    /// Handle to an uploaded mesh
    pub struct MeshHandle;
}

/// Material descriptor sets available to textures
pub const MAX_TEXTURES: u32 = 256;

/// The renderer and every object it owns
pub struct Renderer {
    // Field order is drop order. The frame loop waits for the device to go
    // idle before anything it may still reference is released.
    frame_loop: FrameLoop,
    textures: SlotMap<TextureHandle, Texture>,
    meshes: SlotMap<MeshHandle, Mesh>,
    images: SlotMap<ImageHandle, Image>,
    buffers: SlotMap<BufferHandle, Buffer>,
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    material_layout: DescriptorSetLayout,
    frame_layout: DescriptorSetLayout,
    ctx: Arc<DeviceContext>,
    last_stats: DrawStats,
}

impl Renderer {
    /// Build the renderer, loading shaders from the configured paths
    pub fn from_config(ctx: Arc<DeviceContext>, config: &RendererConfig) -> VulkanResult<Self> {
        let vertex = ShaderModule::from_file(&ctx, &config.shaders.vertex)?;
        let fragment = ShaderModule::from_file(&ctx, &config.shaders.fragment)?;
        Self::new(ctx, config, &vertex, &fragment)
    }

    /// Build the renderer with already created shader modules
    ///
    /// The modules are only needed during pipeline creation and may be
    /// dropped afterwards.
    pub fn new(
        ctx: Arc<DeviceContext>,
        config: &RendererConfig,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> VulkanResult<Self> {
        config.validate().map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let frames = config.max_frames_in_flight;

        let extent = vk::Extent2D { width: config.window.width, height: config.window.height };
        let swapchain = SwapchainManager::new(&ctx, extent, config.preferred_present_mode.to_vk())?;

        let frame_layout = DescriptorSetLayout::frame_uniforms(&ctx)?;
        let material_layout = DescriptorSetLayout::material(&ctx)?;
        let mut descriptor_pool = DescriptorPool::new(&ctx, frames as u32, MAX_TEXTURES)?;
        let pipeline_layout = PipelineLayout::new(&ctx, &frame_layout, &material_layout)?;
        let pipeline =
            GraphicsPipeline::new(&ctx, swapchain.render_pass(), &pipeline_layout, vertex_shader, fragment_shader)?;

        let uniforms = (0..frames)
            .map(|_| UniformBuffer::<FrameUniforms>::new(&ctx))
            .collect::<VulkanResult<Vec<_>>>()?;
        let bindings: Vec<(vk::Buffer, u64)> = uniforms.iter().map(|u| (u.handle(), u.size())).collect();
        let frame_sets = descriptor_pool.allocate_frame_sets(&frame_layout, &bindings)?;

        let settings = FrameLoopSettings {
            frames_in_flight: frames,
            timeout: config.timeout(),
            clear: ClearValues { color: config.clear_color, depth: 1.0 },
        };
        let binding = PipelineBinding { pipeline: pipeline.handle(), layout: pipeline_layout.handle() };
        let frame_loop =
            FrameLoop::new(&ctx, swapchain, binding, uniforms.into_iter().zip(frame_sets).collect(), settings)?;

        log::info!("Renderer ready on {}", ctx.adapter_name());
        Ok(Self {
            frame_loop,
            textures: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            images: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            pipeline,
            pipeline_layout,
            descriptor_pool,
            material_layout,
            frame_layout,
            ctx,
            last_stats: DrawStats::default(),
        })
    }

    /// Device context shared by all resources
    pub const fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    // Resource creation

    /// Create a buffer of exactly `size` bytes
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferHandle> {
        let buffer = Buffer::new(&self.ctx, size, usage, properties)?;
        Ok(self.buffers.insert(buffer))
    }

    /// Buffer behind a handle
    pub fn buffer(&self, handle: BufferHandle) -> VulkanResult<&Buffer> {
        self.buffers.get(handle).ok_or(VulkanError::ResourceNotFound { kind: "buffer" })
    }

    /// Mutable buffer behind a handle, for mapping and writes
    pub fn buffer_mut(&mut self, handle: BufferHandle) -> VulkanResult<&mut Buffer> {
        self.buffers.get_mut(handle).ok_or(VulkanError::ResourceNotFound { kind: "buffer" })
    }

    /// Destroy a buffer once the device is idle
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> VulkanResult<()> {
        self.ctx.wait_idle()?;
        self.buffers.remove(handle).map(drop).ok_or(VulkanError::ResourceNotFound { kind: "buffer" })
    }

    /// Create a 2D image with one view
    pub fn create_image(
        &mut self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<ImageHandle> {
        let spec = ImageSpec { properties, ..ImageSpec::texture_2d(extent, format, usage) };
        let image = Image::new(&self.ctx, spec)?;
        Ok(self.images.insert(image))
    }

    /// Image behind a handle
    pub fn image(&self, handle: ImageHandle) -> VulkanResult<&Image> {
        self.images.get(handle).ok_or(VulkanError::ResourceNotFound { kind: "image" })
    }

    /// Mutable image behind a handle, for layout transitions
    pub fn image_mut(&mut self, handle: ImageHandle) -> VulkanResult<&mut Image> {
        self.images.get_mut(handle).ok_or(VulkanError::ResourceNotFound { kind: "image" })
    }

    /// Destroy an image once the device is idle
    pub fn destroy_image(&mut self, handle: ImageHandle) -> VulkanResult<()> {
        self.ctx.wait_idle()?;
        self.images.remove(handle).map(drop).ok_or(VulkanError::ResourceNotFound { kind: "image" })
    }

    /// Upload tightly packed RGBA8 pixels as a sampled texture
    pub fn load_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> VulkanResult<TextureHandle> {
        let texture = Texture::from_rgba(&self.ctx, pixels, width, height)?;
        self.register_texture(texture)
    }

    /// Upload six equally sized RGBA8 faces as a cube texture
    pub fn load_texture_layers(&mut self, layers: &[&[u8]], width: u32, height: u32) -> VulkanResult<TextureHandle> {
        let texture = Texture::cube_from_faces(&self.ctx, layers, width, height)?;
        self.register_texture(texture)
    }

    /// Upload one or more equally sized RGBA8 layers as a 2D array texture
    pub fn load_texture_array(&mut self, layers: &[&[u8]], width: u32, height: u32) -> VulkanResult<TextureHandle> {
        let texture = Texture::array_from_layers(&self.ctx, layers, width, height)?;
        self.register_texture(texture)
    }

    fn register_texture(&mut self, mut texture: Texture) -> VulkanResult<TextureHandle> {
        let set = self.descriptor_pool.allocate_material_set(&self.material_layout)?;
        texture.attach_descriptor_set(&self.ctx, set);
        Ok(self.textures.insert(texture))
    }

    /// Texture behind a handle
    pub fn texture(&self, handle: TextureHandle) -> VulkanResult<&Texture> {
        self.textures.get(handle).ok_or(VulkanError::ResourceNotFound { kind: "texture" })
    }

    /// Upload an indexed mesh into device-local buffers
    pub fn create_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> VulkanResult<MeshHandle> {
        let mesh = Mesh::new(&self.ctx, vertices, indices)?;
        Ok(self.meshes.insert(mesh))
    }

    /// Mesh behind a handle
    pub fn mesh(&self, handle: MeshHandle) -> VulkanResult<&Mesh> {
        self.meshes.get(handle).ok_or(VulkanError::ResourceNotFound { kind: "mesh" })
    }

    // Frame boundary

    /// Start a frame; `SwapchainStale` means skip this iteration
    pub fn begin_frame(&mut self) -> VulkanResult<FrameBegin> {
        self.frame_loop.begin_frame()
    }

    /// Write this frame's view and projection
    pub fn update_uniform(&mut self, frame: &FrameContext, data: &FrameUniforms) -> VulkanResult<()> {
        self.frame_loop.update_uniform(frame, data)
    }

    /// Record one drawable
    pub fn record_draw(&mut self, frame: &mut FrameContext, drawable: &Drawable) -> VulkanResult<()> {
        let mesh = self.meshes.get(drawable.mesh).ok_or(VulkanError::ResourceNotFound { kind: "mesh" })?;
        let texture = self.textures.get(drawable.texture).ok_or(VulkanError::ResourceNotFound { kind: "texture" })?;
        let material_set = texture
            .descriptor_set()
            .ok_or(VulkanError::ResourceNotFound { kind: "material descriptor set" })?;
        let command = DrawCommand {
            vertex_buffer: mesh.vertex_buffer(),
            index_buffer: mesh.index_buffer(),
            index_count: mesh.index_count(),
            material_set,
            constants: drawable.constants(),
        };
        self.frame_loop.record_draw(frame, &command)
    }

    /// Submit and present the frame
    pub fn end_frame(&mut self, frame: FrameContext) -> VulkanResult<DrawStats> {
        let stats = self.frame_loop.end_frame(frame)?;
        self.last_stats = stats;
        Ok(stats)
    }

    /// Drop a begun frame without submitting or presenting it
    pub fn abandon_frame(&mut self, frame: FrameContext) -> VulkanResult<()> {
        self.frame_loop.abandon_frame(frame)
    }

    /// Draw counters of the last presented frame
    pub const fn last_stats(&self) -> DrawStats {
        self.last_stats
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frame_loop.frames_in_flight()
    }

    /// Frames presented so far
    pub const fn frame_counter(&self) -> u64 {
        self.frame_loop.frame_counter()
    }

    /// Swapchain and its dependents
    pub const fn swapchain(&self) -> &SwapchainManager {
        self.frame_loop.swapchain()
    }

    /// Width over height of the current swapchain
    pub fn aspect_ratio(&self) -> VulkanResult<f32> {
        let extent = self.swapchain().extent()?;
        Ok(extent.width as f32 / extent.height.max(1) as f32)
    }

    /// Window resized; the swapchain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Resize requested to {width}x{height}");
        self.frame_loop.notify_resize(vk::Extent2D { width, height });
    }

    /// Drive frames until `should_quit` returns true
    ///
    /// `should_quit` runs once per iteration before the frame starts, which
    /// is where the caller polls window events and forwards resizes.
    /// `draw_frame` records the frame's uniforms and draws. The device is
    /// idle when this returns, whether the loop ended normally or with an
    /// error. Returns the number of frames presented.
    pub fn run<Q, F>(&mut self, mut should_quit: Q, mut draw_frame: F) -> VulkanResult<u64>
    where
        Q: FnMut(&mut Self) -> bool,
        F: FnMut(&mut Self, &mut FrameContext) -> VulkanResult<()>,
    {
        let start = self.frame_counter();
        let result = self.drive(&mut should_quit, &mut draw_frame);
        let idle = self.shutdown();
        result?;
        idle?;
        Ok(self.frame_counter() - start)
    }

    fn drive<Q, F>(&mut self, should_quit: &mut Q, draw_frame: &mut F) -> VulkanResult<()>
    where
        Q: FnMut(&mut Self) -> bool,
        F: FnMut(&mut Self, &mut FrameContext) -> VulkanResult<()>,
    {
        while !should_quit(self) {
            let mut frame = match self.begin_frame()? {
                FrameBegin::Ready(frame) => frame,
                FrameBegin::SwapchainStale => continue,
            };
            if let Err(e) = draw_frame(self, &mut frame) {
                self.abandon_frame(frame)?;
                return Err(e);
            }
            self.end_frame(frame)?;
        }
        Ok(())
    }

    /// Block until the device has finished all submitted work
    pub fn shutdown(&self) -> VulkanResult<()> {
        log::debug!("Waiting for device idle");
        self.frame_loop.shutdown()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Device wait idle failed while dropping renderer: {e}");
        }
        log::debug!(
            "Releasing {} textures, {} meshes, {} images, {} buffers",
            self.textures.len(),
            self.meshes.len(),
            self.images.len(),
            self.buffers.len()
        );
    }
}

//! Shader modules, pipeline layout and the graphics pipeline

use ash::vk;
use nalgebra::Matrix4;
use std::path::Path;
use std::sync::Arc;

use super::render_pass::RenderPass;
use crate::vulkan::device::GraphicsPipelineDesc;
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::resources::descriptors::DescriptorSetLayout;
use crate::vulkan::resources::mesh::Vertex;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Per-object push constants: model matrix and normal matrix, column-major
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConstants {
    /// Object to world transform
    pub model: [[f32; 4]; 4],
    /// Inverse-transpose of the model matrix, padded to 4x4
    pub normal: [[f32; 4]; 4],
}

unsafe impl bytemuck::Pod for ModelConstants {}
unsafe impl bytemuck::Zeroable for ModelConstants {}

impl Default for ModelConstants {
    fn default() -> Self {
        let identity = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]];
        Self { model: identity, normal: identity }
    }
}

/// Per-frame uniform block at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    /// World to view transform
    pub view: [[f32; 4]; 4],
    /// View to clip transform, Y already flipped for Vulkan clip space
    pub projection: [[f32; 4]; 4],
}

unsafe impl bytemuck::Pod for FrameUniforms {}
unsafe impl bytemuck::Zeroable for FrameUniforms {}

impl FrameUniforms {
    /// Build from column-major matrices, flipping the projection's Y axis
    pub fn new(view: &Matrix4<f32>, projection: &Matrix4<f32>) -> Self {
        let mut projection = *projection;
        projection[(1, 1)] *= -1.0;
        Self { view: (*view).into(), projection: projection.into() }
    }
}

/// Decode little-endian SPIR-V bytes into words
pub fn spirv_words(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(VulkanError::InitializationFailed(format!(
            "SPIR-V length {} is not a non-zero multiple of 4",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(VulkanError::InitializationFailed(format!("Bad SPIR-V magic {:#010x}", words[0])));
    }
    Ok(words)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    ctx: Arc<DeviceContext>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(ctx: &Arc<DeviceContext>, bytes: &[u8]) -> VulkanResult<Self> {
        let words = spirv_words(bytes)?;
        let module = ctx.device().create_shader_module(&words).at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), module })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(ctx: &Arc<DeviceContext>, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to read shader file {}: {e}", path.display()))
        })?;
        Self::from_bytes(ctx, &bytes)
    }

    /// Get shader module handle
    pub const fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.ctx.device().destroy_shader_module(self.module);
    }
}

/// Pipeline layout with the frame and material sets and the model push range
pub struct PipelineLayout {
    ctx: Arc<DeviceContext>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Stages that read [`ModelConstants`]
    pub const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;

    /// Create a layout over set 0 = `frame`, set 1 = `material`
    pub fn new(
        ctx: &Arc<DeviceContext>,
        frame: &DescriptorSetLayout,
        material: &DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let push_range = vk::PushConstantRange {
            stage_flags: Self::PUSH_STAGES,
            offset: 0,
            size: std::mem::size_of::<ModelConstants>() as u32,
        };
        let layout = ctx
            .device()
            .create_pipeline_layout(&[frame.handle(), material.handle()], &[push_range])
            .at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), layout })
    }

    /// Get layout handle
    pub const fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.ctx.device().destroy_pipeline_layout(self.layout);
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    ctx: Arc<DeviceContext>,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Create the forward pipeline: triangle list, back-face culling with
    /// counter-clockwise front faces, depth test and alpha blending
    pub fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: &RenderPass,
        layout: &PipelineLayout,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> VulkanResult<Self> {
        let pipeline = ctx.device().create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_shader: vertex_shader.handle(),
            fragment_shader: fragment_shader.handle(),
            vertex_stride: Vertex::STRIDE,
            vertex_attributes: Vertex::attributes(),
            layout: layout.handle(),
            render_pass: render_pass.handle(),
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            alpha_blend: true,
        })
        .at_call_site()?;
        log::info!("Created graphics pipeline");
        Ok(Self { ctx: Arc::clone(ctx), pipeline })
    }

    /// Get pipeline handle
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.ctx.device().destroy_pipeline(self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv_words_little_endian() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(spirv_words(&bytes).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_spirv_rejects_bad_input() {
        assert!(spirv_words(&[]).is_err());
        assert!(spirv_words(&[0x03, 0x02, 0x23]).is_err());
        assert!(spirv_words(&[0; 8]).is_err());
    }

    #[test]
    fn test_frame_uniforms_flip_projection_y() {
        let projection = Matrix4::new_perspective(1.5, 1.0, 0.1, 100.0);
        let uniforms = FrameUniforms::new(&Matrix4::identity(), &projection);
        assert_eq!(uniforms.projection[1][1], -projection[(1, 1)]);
        assert_eq!(uniforms.projection[0][0], projection[(0, 0)]);
        assert_eq!(uniforms.view[3][3], 1.0);
    }

    #[test]
    fn test_model_constants_fit_push_limit() {
        assert_eq!(std::mem::size_of::<ModelConstants>(), 128);
        let constants = ModelConstants::default();
        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(bytes.len(), 128);
    }
}

//! One renderable object

use super::transform::{model_constants, Transform};
use crate::renderer::{MeshHandle, TextureHandle};
use crate::vulkan::rendering::pipeline::ModelConstants;

/// A mesh drawn with a texture at a transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    /// Vertex and index buffers
    pub mesh: MeshHandle,
    /// Texture whose descriptor set is bound as the material
    pub texture: TextureHandle,
    /// Placement in the world
    pub transform: Transform,
}

impl Drawable {
    /// Create a drawable at the identity transform
    pub fn new(mesh: MeshHandle, texture: TextureHandle) -> Self {
        Self { mesh, texture, transform: Transform::default() }
    }

    /// Push constants for this drawable
    pub fn constants(&self) -> ModelConstants {
        model_constants(&self.transform)
    }
}

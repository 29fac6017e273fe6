//! Object transforms
//!
//! [`Transform`] is plain data; the matrices derived from it are free
//! functions so callers can build them without any object hierarchy.

use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector3};

use crate::vulkan::rendering::pipeline::ModelConstants;

/// Translation, rotation and scale of one object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in world space
    pub position: Vector3<f32>,
    /// Orientation
    pub rotation: UnitQuaternion<f32>,
    /// Per-axis scale
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self { position: Vector3::zeros(), rotation: UnitQuaternion::identity(), scale: Vector3::new(1.0, 1.0, 1.0) }
    }
}

impl Transform {
    /// Create a transform with only position
    pub fn from_position(position: Vector3<f32>) -> Self {
        Self { position, ..Default::default() }
    }

    /// Replace the rotation
    #[must_use]
    pub const fn with_rotation(mut self, rotation: UnitQuaternion<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    /// Replace the scale with a uniform one
    #[must_use]
    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vector3::new(scale, scale, scale);
        self
    }
}

/// Object to world matrix: translate * rotate * scale
pub fn model_matrix(transform: &Transform) -> Matrix4<f32> {
    Matrix4::new_translation(&transform.position)
        * transform.rotation.to_homogeneous()
        * Matrix4::new_nonuniform_scaling(&transform.scale)
}

/// Inverse-transpose of the model matrix's upper 3x3, padded to 4x4
///
/// A degenerate scale has no inverse; identity is returned in that case.
pub fn normal_matrix(transform: &Transform) -> Matrix4<f32> {
    let upper: Matrix3<f32> = model_matrix(transform).fixed_view::<3, 3>(0, 0).into_owned();
    let normal = upper.try_inverse().map_or_else(Matrix3::identity, |inverse| inverse.transpose());
    normal.to_homogeneous()
}

/// Push constants for one draw
pub fn model_constants(transform: &Transform) -> ModelConstants {
    ModelConstants { model: model_matrix(transform).into(), normal: normal_matrix(transform).into() }
}

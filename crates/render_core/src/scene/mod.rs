//! Scene-side value types handed to the renderer

pub mod drawable;
pub mod transform;

pub use drawable::Drawable;
pub use transform::{model_constants, model_matrix, normal_matrix, Transform};

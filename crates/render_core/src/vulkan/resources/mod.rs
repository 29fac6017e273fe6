pub mod buffer;
pub mod descriptors;
pub mod image;
pub mod mesh;
pub mod texture;

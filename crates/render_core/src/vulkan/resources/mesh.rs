//! Vertex format and device-local mesh buffers

use ash::vk;
use std::sync::Arc;

use super::buffer::{Buffer, HOST_MEMORY};
use crate::vulkan::device::VertexAttribute;
use crate::vulkan::error::{VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

/// Vertex layout consumed by the graphics pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    /// Object-space position (location 0)
    pub position: [f32; 3],
    /// Vertex color (location 1)
    pub color: [f32; 3],
    /// Texture coordinate (location 2)
    pub uv: [f32; 2],
}

unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Byte stride between consecutive vertices
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    /// Construct a vertex
    pub const fn new(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, uv }
    }

    /// Attribute layout at binding 0
    pub fn attributes() -> Vec<VertexAttribute> {
        vec![
            VertexAttribute { location: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
            VertexAttribute { location: 1, format: vk::Format::R32G32B32_SFLOAT, offset: 12 },
            VertexAttribute { location: 2, format: vk::Format::R32G32_SFLOAT, offset: 24 },
        ]
    }
}

/// Indexed triangle mesh in device-local memory
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    /// Upload vertices and 32-bit indices through staging buffers
    pub fn new(ctx: &Arc<DeviceContext>, vertices: &[Vertex], indices: &[u32]) -> VulkanResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(VulkanError::InvalidOperation { reason: "Mesh needs vertices and indices".to_string() });
        }
        if let Some(&index) = indices.iter().find(|&&index| index as usize >= vertices.len()) {
            return Err(VulkanError::OutOfBounds { offset: u64::from(index), len: 1, size: vertices.len() as u64 });
        }
        let vertex_buffer =
            upload_device_local(ctx, bytemuck::cast_slice(vertices), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = upload_device_local(ctx, bytemuck::cast_slice(indices), vk::BufferUsageFlags::INDEX_BUFFER)?;
        log::debug!("Uploaded mesh with {} vertices and {} indices", vertices.len(), indices.len());

        Ok(Self { vertex_buffer, index_buffer, index_count: indices.len() as u32 })
    }

    /// Vertex buffer handle
    pub const fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    /// Index buffer handle
    pub const fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Number of indices
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Copy `bytes` into a new device-local buffer with `usage` through a staging buffer
pub fn upload_device_local(
    ctx: &Arc<DeviceContext>,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> VulkanResult<Buffer> {
    let size = bytes.len() as vk::DeviceSize;
    let mut staging = Buffer::new(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY)?;
    staging.set_memory(bytes)?;
    let buffer = Buffer::new(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    staging.copy_to_buffer(&buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::headless::ObjectKind;
    use crate::vulkan::device::HeadlessDevice;
    use crate::vulkan::initialization::adapter::QueueFamilies;

    fn triangle() -> [Vertex; 3] {
        [
            Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0], [0.5, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn test_vertex_layout_matches_attributes() {
        assert_eq!(Vertex::STRIDE, 32);
        let attributes = Vertex::attributes();
        assert_eq!(attributes.last().map(|a| a.offset), Some(24));
    }

    #[test]
    fn test_mesh_upload_leaves_only_device_buffers() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        let vertices = triangle();
        let mesh = Mesh::new(&ctx, &vertices, &[0, 1, 2]).unwrap();
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(device.live_count_of(ObjectKind::Buffer), 2);
        let uploaded = device.buffer_contents(mesh.vertex_buffer()).unwrap();
        assert_eq!(uploaded.as_slice(), bytemuck::cast_slice::<Vertex, u8>(&vertices));
        let indices = device.buffer_contents(mesh.index_buffer()).unwrap();
        assert_eq!(indices.as_slice(), bytemuck::cast_slice::<u32, u8>(&[0, 1, 2]));
    }

    #[test]
    fn test_mesh_rejects_out_of_range_index() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        assert!(matches!(Mesh::new(&ctx, &triangle(), &[0, 1, 3]), Err(VulkanError::OutOfBounds { .. })));
        assert!(Mesh::new(&ctx, &[], &[]).is_err());
        assert_eq!(device.live_count_of(ObjectKind::Buffer), 0);
    }
}

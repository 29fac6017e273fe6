//! Buffer management for vertex data, uploads and uniforms
//!
//! A [`Buffer`] owns one native buffer and the memory block bound to it.
//! Construction performs create → query requirements → pick memory type →
//! allocate → bind as one step; a failure anywhere releases whatever was
//! already created. Host access goes through an explicit map, and copies to
//! other resources block until the device has finished them, so the source
//! can be dropped as soon as a copy returns.

use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use super::image::{Image, ImageLayout};
use crate::vulkan::device::BufferImageCopy;
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::rendering::commands::execute_one_time;

/// Memory properties used for host-written upload and uniform buffers
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// GPU buffer with exclusively owned memory
pub struct Buffer {
    ctx: Arc<DeviceContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    mapped: Option<NonNull<u8>>,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation { reason: "Buffer size must be non-zero".to_string() });
        }
        let device = ctx.device();
        let buffer = device.create_buffer(size, usage).at_call_site()?;
        let memory = match Self::allocate_and_bind(ctx, buffer, properties) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };
        log::debug!("Created buffer of {size} bytes ({usage:?}, {properties:?})");

        Ok(Self { ctx: Arc::clone(ctx), buffer, memory, size, usage, properties, mapped: None })
    }

    fn allocate_and_bind(
        ctx: &DeviceContext,
        buffer: vk::Buffer,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let device = ctx.device();
        let requirements = device.buffer_memory_requirements(buffer);
        let memory_type = ctx.find_memory_type(requirements.memory_type_bits, properties)?;
        let memory = device.allocate_memory(requirements.size, memory_type).at_call_site()?;
        if let Err(e) = device.bind_buffer_memory(buffer, memory).at_call_site() {
            device.free_memory(memory);
            return Err(e);
        }
        Ok(memory)
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size requested at construction
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags
    pub const fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Backing memory block
    pub const fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Whether the memory is currently mapped
    pub const fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Map the whole buffer into host address space
    ///
    /// Mapping an already mapped buffer is a no-op.
    pub fn map(&mut self) -> VulkanResult<()> {
        if self.mapped.is_some() {
            return Ok(());
        }
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot map a buffer without host-visible memory".to_string(),
            });
        }
        let ptr = self.ctx.device().map_memory(self.memory, 0, self.size).at_call_site()?;
        self.mapped = NonNull::new(ptr.cast::<u8>());
        if self.mapped.is_none() {
            self.ctx.device().unmap_memory(self.memory);
            return Err(VulkanError::BufferNotMapped);
        }
        Ok(())
    }

    /// Unmap the buffer if mapped
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            self.ctx.device().unmap_memory(self.memory);
        }
    }

    /// Fill the whole buffer with `data`
    ///
    /// `data` must be exactly the buffer size. A buffer that was not mapped
    /// before the call is unmapped again afterwards.
    pub fn set_memory(&mut self, data: &[u8]) -> VulkanResult<()> {
        if data.len() as u64 != self.size {
            return Err(VulkanError::SizeMismatch { expected: self.size, actual: data.len() as u64 });
        }
        let was_mapped = self.is_mapped();
        self.map()?;
        let result = self.write_mapped(0, data);
        if !was_mapped {
            self.unmap();
        }
        result
    }

    fn mapped_range(&self, offset: u64, len: usize) -> VulkanResult<NonNull<u8>> {
        let ptr = self.mapped.ok_or(VulkanError::BufferNotMapped)?;
        let len = len as u64;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(VulkanError::OutOfBounds { offset, len, size: self.size });
        }
        let offset = usize::try_from(offset).map_err(|_| VulkanError::OutOfBounds { offset, len, size: self.size })?;
        // SAFETY: offset + len lies within the mapped range checked above.
        Ok(unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset)) })
    }

    /// Write bytes into the mapped region at `offset`
    pub fn write_mapped(&mut self, offset: u64, data: &[u8]) -> VulkanResult<()> {
        let dst = self.mapped_range(offset, data.len())?;
        // SAFETY: the destination range is mapped and cannot overlap the borrowed source.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len()) };
        Ok(())
    }

    /// Read `len` bytes back from the mapped region at `offset`
    pub fn read_mapped(&self, offset: u64, len: usize) -> VulkanResult<Vec<u8>> {
        let src = self.mapped_range(offset, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: the source range is mapped and `out` holds `len` bytes.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr(), len) };
        Ok(out)
    }

    /// Write a plain-data value into the mapped region at `offset`
    pub fn write_pod<T: Pod>(&mut self, offset: u64, value: &T) -> VulkanResult<()> {
        self.write_mapped(offset, bytemuck::bytes_of(value))
    }

    /// Copy the whole buffer into `dst` and wait for completion
    pub fn copy_to_buffer(&self, dst: &Self) -> VulkanResult<()> {
        if dst.size < self.size {
            return Err(VulkanError::SizeMismatch { expected: self.size, actual: dst.size });
        }
        self.require_usage(vk::BufferUsageFlags::TRANSFER_SRC)?;
        dst.require_usage(vk::BufferUsageFlags::TRANSFER_DST)?;

        let (src_handle, dst_handle, size) = (self.buffer, dst.buffer, self.size);
        execute_one_time(&self.ctx, |recorder| {
            recorder.copy_buffer(src_handle, dst_handle, size);
            Ok(())
        })
    }

    /// Copy tightly packed texels into every layer of `image` and wait for completion
    ///
    /// The image must already be in [`ImageLayout::TransferDstOptimal`].
    pub fn copy_to_image(&self, image: &Image) -> VulkanResult<()> {
        if image.layout() != ImageLayout::TransferDstOptimal {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Copy destination must be TransferDstOptimal, image is {:?}", image.layout()),
            });
        }
        self.require_usage(vk::BufferUsageFlags::TRANSFER_SRC)?;
        if let Some(required) = image.byte_size() {
            if self.size < required {
                return Err(VulkanError::SizeMismatch { expected: required, actual: self.size });
            }
        }

        let extent = image.extent();
        let region = BufferImageCopy {
            buffer_offset: 0,
            aspect: image.aspect(),
            base_array_layer: 0,
            layer_count: image.array_layers(),
            extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
        };
        let (src_handle, dst_handle) = (self.buffer, image.handle());
        execute_one_time(&self.ctx, |recorder| {
            recorder.copy_buffer_to_image(src_handle, dst_handle, &[region]);
            Ok(())
        })
    }

    fn require_usage(&self, usage: vk::BufferUsageFlags) -> VulkanResult<()> {
        if self.usage.contains(usage) {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation { reason: format!("Buffer was not created with {usage:?}") })
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        let device = self.ctx.device();
        device.destroy_buffer(self.buffer);
        device.free_memory(self.memory);
        log::trace!("Destroyed buffer of {} bytes", self.size);
    }
}

/// Persistently mapped uniform buffer holding one `T`
pub struct UniformBuffer<T> {
    buffer: Buffer,
    _phantom: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Create and map a host-coherent uniform buffer
    pub fn new(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let mut buffer = Buffer::new(
            ctx,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            HOST_MEMORY,
        )?;
        buffer.map()?;
        Ok(Self { buffer, _phantom: PhantomData })
    }

    /// Update uniform data
    pub fn update(&mut self, data: &T) -> VulkanResult<()> {
        self.buffer.write_pod(0, data)
    }

    /// Current contents
    pub fn read(&self) -> VulkanResult<T> {
        let bytes = self.buffer.read_mapped(0, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size of the uniform block
    pub const fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::headless::ObjectKind;
    use crate::vulkan::device::HeadlessDevice;
    use crate::vulkan::initialization::adapter::QueueFamilies;

    fn context(device: &Arc<HeadlessDevice>) -> Arc<DeviceContext> {
        DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0).unwrap()
    }

    #[test]
    fn test_buffer_reports_requested_size() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        for size in [1, 3, 64, 4096] {
            let buffer = Buffer::new(&ctx, size, vk::BufferUsageFlags::VERTEX_BUFFER, HOST_MEMORY).unwrap();
            assert_eq!(buffer.size(), size);
        }
    }

    #[test]
    fn test_failed_allocation_releases_buffer() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        device.fail_next_allocation();
        let result = Buffer::new(&ctx, 64, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_MEMORY);
        match result.err() {
            Some(VulkanError::Api { call, file, .. }) => {
                assert_eq!(call, "vkAllocateMemory");
                assert!(file.ends_with("buffer.rs"), "error located at {file}");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(device.live_count_of(ObjectKind::Buffer), 0);
        assert_eq!(device.live_count_of(ObjectKind::Memory), 0);
    }

    #[test]
    fn test_set_memory_requires_exact_size() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let mut buffer = Buffer::new(&ctx, 8, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY).unwrap();
        assert_eq!(buffer.set_memory(&[1, 2, 3]), Err(VulkanError::SizeMismatch { expected: 8, actual: 3 }));
        buffer.set_memory(&[7; 8]).unwrap();
        assert!(!buffer.is_mapped());
        assert_eq!(device.buffer_contents(buffer.handle()).unwrap(), vec![7; 8]);
    }

    #[test]
    fn test_unmapped_access_fails() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let mut buffer = Buffer::new(&ctx, 16, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY).unwrap();
        assert_eq!(buffer.write_mapped(0, &[1]), Err(VulkanError::BufferNotMapped));
        buffer.map().unwrap();
        buffer.map().unwrap();
        assert_eq!(
            buffer.write_mapped(12, &[0; 8]),
            Err(VulkanError::OutOfBounds { offset: 12, len: 8, size: 16 })
        );
    }

    #[test]
    fn test_device_local_buffer_cannot_map() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let mut buffer =
            Buffer::new(&ctx, 16, vk::BufferUsageFlags::VERTEX_BUFFER, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert!(matches!(buffer.map(), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_copy_to_buffer_moves_contents() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let mut src = Buffer::new(&ctx, 4, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY).unwrap();
        src.set_memory(&[9, 8, 7, 6]).unwrap();
        let dst = Buffer::new(
            &ctx,
            8,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
        src.copy_to_buffer(&dst).unwrap();
        assert_eq!(&device.buffer_contents(dst.handle()).unwrap()[..4], &[9, 8, 7, 6]);
        assert!(matches!(dst.copy_to_buffer(&src), Err(VulkanError::SizeMismatch { .. })));
    }

    #[test]
    fn test_uniform_buffer_stays_mapped() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let mut uniform = UniformBuffer::<[f32; 4]>::new(&ctx).unwrap();
        uniform.update(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(uniform.read().unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(uniform.size(), 16);
    }

    #[test]
    fn test_drop_releases_buffer_and_memory() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let buffer = Buffer::new(&ctx, 32, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_MEMORY).unwrap();
        let handle = buffer.handle();
        drop(buffer);
        assert!(!device.is_live(handle));
        assert_eq!(device.live_count_of(ObjectKind::Memory), 0);
    }
}

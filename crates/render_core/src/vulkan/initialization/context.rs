//! Device context
//!
//! Owns the logical device, its graphics and present queues and the command
//! pool used for one-time transfers. Every resource keeps an
//! `Arc<DeviceContext>`, so the context is necessarily the last object to be
//! destroyed.

use ash::vk;
use std::sync::Arc;

use super::adapter::{self, AdapterInfo, AdapterRequirements, QueueFamilies};
use super::instance::{VulkanInstance, VulkanSurface};
use crate::vulkan::device::{AshDevice, GpuDevice};
use crate::vulkan::error::{CallSite, VulkanResult};

/// Logical device plus the queues and pool shared by all components
pub struct DeviceContext {
    device: Arc<dyn GpuDevice>,
    adapter_name: String,
    memory_types: Vec<vk::MemoryPropertyFlags>,
    max_anisotropy: f32,
    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
}

impl DeviceContext {
    /// Wrap an already created logical device
    pub fn new(
        device: Arc<dyn GpuDevice>,
        adapter_name: impl Into<String>,
        queue_families: QueueFamilies,
        max_anisotropy: f32,
    ) -> VulkanResult<Arc<Self>> {
        let graphics_queue = device.queue(queue_families.graphics, 0);
        let present_queue = if queue_families.present == queue_families.graphics {
            graphics_queue
        } else {
            device.queue(queue_families.present, 0)
        };
        let command_pool = device.create_command_pool(queue_families.graphics).at_call_site()?;
        let memory_types = device.memory_types();

        Ok(Arc::new(Self {
            device,
            adapter_name: adapter_name.into(),
            memory_types,
            max_anisotropy,
            queue_families,
            graphics_queue,
            present_queue,
            command_pool,
        }))
    }

    /// Create the logical device for a selected adapter
    ///
    /// One queue is requested per distinct family; when graphics and present
    /// share a family the same queue serves both roles.
    pub fn create_native(
        instance: &VulkanInstance,
        surface: &VulkanSurface,
        adapter: &AdapterInfo,
        queue_families: QueueFamilies,
        requirements: &AdapterRequirements,
    ) -> VulkanResult<Arc<Self>> {
        let extensions = adapter.device_extensions(requirements);
        let device = AshDevice::create(
            instance,
            surface.handle(),
            adapter,
            &queue_families.unique(),
            &extensions,
            requirements.features,
        )?;
        Self::new(Arc::new(device), adapter.name.clone(), queue_families, adapter.max_anisotropy)
    }

    /// The logical device
    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    /// Name of the adapter the device was created on
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Memory type index satisfying `type_bits` and `required`
    pub fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        adapter::find_memory_type(&self.memory_types, type_bits, required)
    }

    /// Largest anisotropy the adapter supports
    pub const fn max_anisotropy(&self) -> f32 {
        self.max_anisotropy
    }

    /// Queue families in use
    pub const fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Graphics queue
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue, identical to the graphics queue when the families match
    pub const fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Pool for transient command buffers
    pub const fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Block until all submitted work has finished
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.device.device_wait_idle().at_call_site()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.device_wait_idle() {
            log::error!("Device wait idle failed during teardown: {e}");
        }
        self.device.destroy_command_pool(self.command_pool);
        log::debug!("Destroyed device context for {}", self.adapter_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::HeadlessDevice;
    use crate::vulkan::device::headless::ObjectKind;

    #[test]
    fn test_shared_family_reuses_queue() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device, "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0).unwrap();
        assert_eq!(ctx.graphics_queue(), ctx.present_queue());
    }

    #[test]
    fn test_split_families_get_distinct_queues() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device, "headless", QueueFamilies { graphics: 0, present: 1 }, 16.0).unwrap();
        assert_ne!(ctx.graphics_queue(), ctx.present_queue());
    }

    #[test]
    fn test_drop_releases_command_pool() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0)
            .unwrap();
        assert_eq!(device.live_count_of(ObjectKind::CommandPool), 1);
        drop(ctx);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn test_memory_type_lookup_uses_device_types() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device, "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0).unwrap();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(ctx.find_memory_type(0b111, host).unwrap(), 1);
        assert_eq!(ctx.find_memory_type(0b100, host).unwrap(), 2);
    }
}

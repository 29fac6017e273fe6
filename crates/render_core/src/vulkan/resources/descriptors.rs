//! Descriptor set layouts and pool
//!
//! Set 0 holds the per-frame uniform buffer (binding 0, vertex stage); set 1
//! holds a material's combined image sampler (binding 0, fragment stage).

use ash::vk;
use std::sync::Arc;

use crate::vulkan::device::{DescriptorBinding, DescriptorWrite};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

/// Set index of the per-frame uniform set
pub const FRAME_SET: u32 = 0;
/// Set index of the per-material texture set
pub const MATERIAL_SET: u32 = 1;

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    ctx: Arc<DeviceContext>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Create a layout from its bindings
    pub fn new(ctx: &Arc<DeviceContext>, bindings: &[DescriptorBinding]) -> VulkanResult<Self> {
        let layout = ctx.device().create_descriptor_set_layout(bindings).at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), layout })
    }

    /// Uniform buffer at binding 0 read by the vertex stage
    pub fn frame_uniforms(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        Self::new(
            ctx,
            &[DescriptorBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                stages: vk::ShaderStageFlags::VERTEX,
            }],
        )
    }

    /// Combined image sampler at binding 0 read by the fragment stage
    pub fn material(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        Self::new(
            ctx,
            &[DescriptorBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                stages: vk::ShaderStageFlags::FRAGMENT,
            }],
        )
    }

    /// Get layout handle
    pub const fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.ctx.device().destroy_descriptor_set_layout(self.layout);
    }
}

/// Pool sized for a fixed number of frame and material sets
///
/// Sets are freed together with the pool.
pub struct DescriptorPool {
    ctx: Arc<DeviceContext>,
    pool: vk::DescriptorPool,
    frame_capacity: u32,
    material_capacity: u32,
    frame_allocated: u32,
    material_allocated: u32,
}

impl DescriptorPool {
    /// Create a pool holding `frame_sets` uniform sets and `material_sets` sampler sets
    pub fn new(ctx: &Arc<DeviceContext>, frame_sets: u32, material_sets: u32) -> VulkanResult<Self> {
        let sizes = [
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: frame_sets.max(1) },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: material_sets.max(1),
            },
        ];
        let pool = ctx.device().create_descriptor_pool(frame_sets + material_sets, &sizes).at_call_site()?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            pool,
            frame_capacity: frame_sets,
            material_capacity: material_sets,
            frame_allocated: 0,
            material_allocated: 0,
        })
    }

    fn exhausted(kind: &str) -> VulkanError {
        VulkanError::InvalidOperation { reason: format!("Descriptor pool has no {kind} sets left") }
    }

    /// Allocate one frame uniform set per layout entry and point each at its buffer
    pub fn allocate_frame_sets(
        &mut self,
        layout: &DescriptorSetLayout,
        buffers: &[(vk::Buffer, u64)],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let count = buffers.len() as u32;
        if self.frame_allocated + count > self.frame_capacity {
            return Err(Self::exhausted("frame"));
        }
        let layouts = vec![layout.handle(); buffers.len()];
        let sets = self.ctx.device().allocate_descriptor_sets(self.pool, &layouts).at_call_site()?;
        let writes: Vec<DescriptorWrite> = sets
            .iter()
            .zip(buffers)
            .map(|(&set, &(buffer, range))| DescriptorWrite::UniformBuffer { set, binding: 0, buffer, range })
            .collect();
        self.ctx.device().update_descriptor_sets(&writes);
        self.frame_allocated += count;
        Ok(sets)
    }

    /// Allocate one material set
    pub fn allocate_material_set(&mut self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        if self.material_allocated >= self.material_capacity {
            return Err(Self::exhausted("material"));
        }
        let set = self
            .ctx
            .device()
            .allocate_descriptor_sets(self.pool, &[layout.handle()])
            .at_call_site()?
            .into_iter()
            .next()
            .ok_or_else(|| Self::exhausted("material"))?;
        self.material_allocated += 1;
        Ok(set)
    }

    /// Get pool handle
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.ctx.device().destroy_descriptor_pool(self.pool);
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
    fn test_frame_sets_point_at_their_buffers() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let layout = DescriptorSetLayout::frame_uniforms(&ctx).unwrap();
        let mut pool = DescriptorPool::new(&ctx, 2, 1).unwrap();
        let buffers = [(vk::Buffer::null(), 128), (vk::Buffer::null(), 128)];
        let sets = pool.allocate_frame_sets(&layout, &buffers).unwrap();
        assert_eq!(sets.len(), 2);
        assert_ne!(sets[0], sets[1]);
        assert_eq!(device.descriptor_writes().len(), 2);
    }

    #[test]
    fn test_pool_capacity_is_enforced() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let layout = DescriptorSetLayout::material(&ctx).unwrap();
        let mut pool = DescriptorPool::new(&ctx, 0, 1).unwrap();
        pool.allocate_material_set(&layout).unwrap();
        assert!(matches!(pool.allocate_material_set(&layout), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_pool_drop_frees_sets() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let layout = DescriptorSetLayout::material(&ctx).unwrap();
        let mut pool = DescriptorPool::new(&ctx, 0, 2).unwrap();
        pool.allocate_material_set(&layout).unwrap();
        pool.allocate_material_set(&layout).unwrap();
        assert_eq!(device.live_count_of(ObjectKind::DescriptorSet), 2);
        drop(pool);
        assert_eq!(device.live_count_of(ObjectKind::DescriptorSet), 0);
    }
}

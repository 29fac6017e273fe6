//! Synchronization primitives for frames in flight

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

/// Convert a timeout to nanoseconds, saturating at "wait forever"
pub fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// GPU-GPU synchronization primitive with RAII cleanup
pub struct Semaphore {
    ctx: Arc<DeviceContext>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let semaphore = ctx.device().create_semaphore().at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), semaphore })
    }

    /// Get the semaphore handle
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.ctx.device().destroy_semaphore(self.semaphore);
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    ctx: Arc<DeviceContext>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(ctx: &Arc<DeviceContext>, signaled: bool) -> VulkanResult<Self> {
        let fence = ctx.device().create_fence(signaled).at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), fence })
    }

    /// Block until the fence is signaled
    ///
    /// Expiry of `timeout` is reported as [`VulkanError::DeviceTimeout`].
    pub fn wait(&self, timeout: Duration) -> VulkanResult<()> {
        if self.ctx.device().wait_for_fence(self.fence, timeout_ns(timeout)).at_call_site()? {
            Ok(())
        } else {
            Err(VulkanError::DeviceTimeout { what: "in-flight fence", timeout })
        }
    }

    /// Whether the fence is signaled, without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        self.ctx.device().fence_status(self.fence).at_call_site()
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        self.ctx.device().reset_fence(self.fence).at_call_site()
    }

    /// Get the fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.ctx.device().destroy_fence(self.fence);
    }
}

/// Frame synchronization objects for one in-flight slot
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready to be rendered to
    pub image_available: Semaphore,
    /// Signaled when the slot's commands finish; presentation waits on it
    pub render_finished: Semaphore,
    /// Signaled when the GPU is done with the slot's command and uniform buffers
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects, fence initially signaled
    pub fn new(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(ctx)?,
            render_finished: Semaphore::new(ctx)?,
            in_flight: Fence::new(ctx, true)?,
        })
    }

    /// Swap in a fresh image-available semaphore
    ///
    /// Needed after an acquire that may have left the old one with a pending
    /// signal and no waiter.
    pub fn replace_image_available(&mut self, ctx: &Arc<DeviceContext>) -> VulkanResult<()> {
        self.image_available = Semaphore::new(ctx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::HeadlessDevice;
    use crate::vulkan::device::SubmitDesc;
    use crate::vulkan::initialization::adapter::QueueFamilies;

    #[test]
    fn test_timeout_saturates() {
        assert_eq!(timeout_ns(Duration::from_millis(5)), 5_000_000);
        assert_eq!(timeout_ns(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let device = Arc::new(HeadlessDevice::manual());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        let fence = Fence::new(&ctx, false).unwrap();
        let timeout = Duration::from_millis(10);
        assert_eq!(fence.wait(timeout), Err(VulkanError::DeviceTimeout { what: "in-flight fence", timeout }));

        ctx.device().queue_submit(ctx.graphics_queue(), &SubmitDesc::default(), fence.handle()).unwrap();
        assert!(!fence.is_signaled().unwrap());
        assert!(device.complete_next_submission());
        fence.wait(timeout).unwrap();
    }

    #[test]
    fn test_frame_sync_starts_signaled() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)
            .unwrap();
        let mut sync = FrameSync::new(&ctx).unwrap();
        assert!(sync.in_flight.is_signaled().unwrap());
        let old = sync.image_available.handle();
        sync.replace_image_available(&ctx).unwrap();
        assert!(!device.is_live(old));
    }
}

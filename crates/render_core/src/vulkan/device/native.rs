//! Native device backed by `ash`

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::{c_char, c_void, CStr, CString};

use super::{
    BufferImageCopy, DescriptorBinding, DescriptorWrite, GpuDevice, GraphicsPipelineDesc, ImageBarrier, ImageDesc,
    ImageViewDesc, PresentDesc, RenderPassBegin, RenderPassDesc, SamplerDesc, SubmitDesc, SwapchainDesc,
};
use crate::vk_check;
use crate::vulkan::error::{VulkanError, VulkanResult};
use crate::vulkan::initialization::adapter::{AdapterFeatures, AdapterInfo};
use crate::vulkan::initialization::instance::VulkanInstance;

// SAFETY: the literal is nul-terminated and contains no interior nul
const SHADER_ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Logical device created from a physical adapter, bound to one surface
pub struct AshDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    swapchain_loader: SwapchainLoader,
    memory_types: Vec<vk::MemoryPropertyFlags>,
}

impl AshDevice {
    /// Create the logical device with one queue per distinct family
    pub fn create(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        adapter: &AdapterInfo,
        queue_families: &[u32],
        extensions: &[String],
        features: AdapterFeatures,
    ) -> VulkanResult<Self> {
        let queue_priorities = [1.0_f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_names = extensions
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;
        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let enabled_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(features.contains(AdapterFeatures::SAMPLER_ANISOTROPY))
            .geometry_shader(features.contains(AdapterFeatures::GEOMETRY_SHADER))
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&enabled_features);

        let device = vk_check!("vkCreateDevice", unsafe {
            instance.instance.create_device(adapter.handle, &create_info, None)
        })?;
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);
        log::info!("Created logical device on {} with queue families {:?}", adapter.name, queue_families);

        Ok(Self {
            device,
            physical_device: adapter.handle,
            surface_loader: instance.surface_loader.clone(),
            surface,
            swapchain_loader,
            memory_types: adapter.memory_types.clone(),
        })
    }

    /// Raw `ash` device
    pub const fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::warn!("vkDeviceWaitIdle failed before destroying the device: {e}");
        }
        unsafe { self.device.destroy_device(None) };
    }
}

const fn subresource_range(aspect: vk::ImageAspectFlags, mip_levels: u32, layer_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: mip_levels,
        base_array_layer: 0,
        layer_count,
    }
}

impl GpuDevice for AshDevice {
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        self.memory_types.clone()
    }

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        vk_check!("vkCreateBuffer", unsafe { self.device.create_buffer(&info, None) })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let info = vk::ImageCreateInfo::builder()
            .flags(desc.flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        vk_check!("vkCreateImage", unsafe { self.device.create_image(&info, None) })
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        vk_check!("vkAllocateMemory", unsafe { self.device.allocate_memory(&info, None) })
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()> {
        vk_check!("vkBindBufferMemory", unsafe { self.device.bind_buffer_memory(buffer, memory, 0) })
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()> {
        vk_check!("vkBindImageMemory", unsafe { self.device.bind_image_memory(image, memory, 0) })
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> VulkanResult<*mut c_void> {
        vk_check!("vkMapMemory", unsafe {
            self.device.map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        })
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(subresource_range(desc.aspect, desc.mip_levels, desc.layer_count));
        vk_check!("vkCreateImageView", unsafe { self.device.create_image_view(&info, None) })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .min_lod(0.0)
            .max_lod(0.0);
        vk_check!("vkCreateSampler", unsafe { self.device.create_sampler(&info, None) })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_command_pool(&self, queue_family: u32) -> VulkanResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        vk_check!("vkCreateCommandPool", unsafe { self.device.create_command_pool(&info, None) })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        vk_check!("vkAllocateCommandBuffers", unsafe { self.device.allocate_command_buffers(&info) })
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        let info = vk::CommandBufferBeginInfo::builder().flags(flags);
        vk_check!("vkBeginCommandBuffer", unsafe { self.device.begin_command_buffer(cb, &info) })
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VulkanResult<()> {
        vk_check!("vkEndCommandBuffer", unsafe { self.device.end_command_buffer(cb) })
    }

    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> VulkanResult<()> {
        vk_check!("vkResetCommandBuffer", unsafe {
            self.device.reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
        })
    }

    fn cmd_copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(cb, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        let regions: Vec<vk::BufferImageCopy> = regions
            .iter()
            .map(|region| vk::BufferImageCopy {
                buffer_offset: region.buffer_offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: region.aspect,
                    mip_level: 0,
                    base_array_layer: region.base_array_layer,
                    layer_count: region.layer_count,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: region.extent,
            })
            .collect();
        unsafe { self.device.cmd_copy_buffer_to_image(cb, src, dst, layout, &regions) }
    }

    fn cmd_pipeline_barrier(
        &self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &ImageBarrier,
    ) {
        let image_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(subresource_range(barrier.aspect, barrier.mip_levels, barrier.layer_count))
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, begin: &RenderPassBegin) {
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: begin.clear.color } },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: begin.clear.depth, stencil: 0 },
            },
        ];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: begin.extent })
            .clear_values(&clear_values);
        unsafe { self.device.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE) }
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cb) }
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cb, vk::PipelineBindPoint::GRAPHICS, layout, first_set, sets, &[]);
        }
    }

    fn cmd_bind_vertex_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64) {
        unsafe { self.device.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[offset]) }
    }

    fn cmd_bind_index_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(cb, buffer, offset, index_type) }
    }

    fn cmd_push_constants(
        &self,
        cb: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cb, layout, stages, offset, data) }
    }

    fn cmd_draw_indexed(&self, cb: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe { self.device.cmd_draw_indexed(cb, index_count, 1, first_index, vertex_offset, 0) }
    }

    fn cmd_set_viewport(&self, cb: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cb, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, cb: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cb, 0, &[scissor]) }
    }

    fn queue(&self, family: u32, index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(family, index) }
    }

    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc, fence: vk::Fence) -> VulkanResult<()> {
        let (wait_semaphores, wait_stages): (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) =
            submit.wait.iter().copied().unzip();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&submit.command_buffers)
            .signal_semaphores(&submit.signal)
            .build();
        vk_check!("vkQueueSubmit", unsafe { self.device.queue_submit(queue, &[submit_info], fence) })
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()> {
        vk_check!("vkQueueWaitIdle", unsafe { self.device.queue_wait_idle(queue) })
    }

    fn device_wait_idle(&self) -> VulkanResult<()> {
        vk_check!("vkDeviceWaitIdle", unsafe { self.device.device_wait_idle() })
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        vk_check!("vkCreateFence", unsafe { self.device.create_fence(&info, None) })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<bool> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(result) => vk_check!("vkWaitForFences", Err(result)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        vk_check!("vkResetFences", unsafe { self.device.reset_fences(&[fence]) })
    }

    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool> {
        vk_check!("vkGetFenceStatus", unsafe { self.device.get_fence_status(fence) })
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        vk_check!("vkCreateSemaphore", unsafe { self.device.create_semaphore(&info, None) })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        vk_check!("vkCreateDescriptorSetLayout", unsafe {
            self.device.create_descriptor_set_layout(&info, None)
        })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder().pool_sizes(sizes).max_sets(max_sets);
        vk_check!("vkCreateDescriptorPool", unsafe { self.device.create_descriptor_pool(&info, None) })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        vk_check!("vkAllocateDescriptorSets", unsafe { self.device.allocate_descriptor_sets(&info) })
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::UniformBuffer { buffer, range, .. } => {
                    [vk::DescriptorBufferInfo { buffer, offset: 0, range }]
                }
                DescriptorWrite::CombinedImageSampler { .. } => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::CombinedImageSampler { view, sampler, .. } => [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }],
                DescriptorWrite::UniformBuffer { .. } => [vk::DescriptorImageInfo::default()],
            })
            .collect();
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| match *write {
                DescriptorWrite::UniformBuffer { set, binding, .. } => vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos[i])
                    .build(),
                DescriptorWrite::CombinedImageSampler { set, binding, .. } => vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos[i])
                    .build(),
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        vk_check!("vkCreateShaderModule", unsafe { self.device.create_shader_module(&info, None) })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        vk_check!("vkCreatePipelineLayout", unsafe { self.device.create_pipeline_layout(&info, None) })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let describe = |attachment: &super::AttachmentDesc| {
            vk::AttachmentDescription::builder()
                .format(attachment.format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(attachment.load_op)
                .store_op(attachment.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(attachment.initial_layout)
                .final_layout(attachment.final_layout)
                .build()
        };
        let mut attachments = vec![describe(&desc.color)];
        if let Some(depth) = &desc.depth {
            attachments.push(describe(depth));
        }

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if desc.depth.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        vk_check!("vkCreateRenderPass", unsafe { self.device.create_render_pass(&info, None) })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_shader)
                .name(SHADER_ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_shader)
                .name(SHADER_ENTRY_POINT)
                .build(),
        ];

        let binding_descriptions = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: 0,
                format: attribute.format,
                offset: attribute.offset,
            })
            .collect();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };
        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)
        };
        vk_check!("vkCreateGraphicsPipelines", pipelines)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("Driver returned no pipeline".to_string()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        vk_check!("vkCreateFramebuffer", unsafe { self.device.create_framebuffer(&info, None) })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        vk_check!("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        })
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        vk_check!("vkGetPhysicalDeviceSurfaceFormatsKHR", unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        })
    }

    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        vk_check!("vkGetPhysicalDeviceSurfacePresentModesKHR", unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR> {
        let concurrent = desc.queue_family_indices.len() > 1;
        let (sharing_mode, family_indices): (vk::SharingMode, &[u32]) = if concurrent {
            (vk::SharingMode::CONCURRENT, &desc.queue_family_indices)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);
        vk_check!("vkCreateSwapchainKHR", unsafe { self.swapchain_loader.create_swapchain(&info, None) })
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        vk_check!("vkGetSwapchainImagesKHR", unsafe { self.swapchain_loader.get_swapchain_images(swapchain) })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        vk_check!("vkAcquireNextImageKHR", unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        })
    }

    fn queue_present(&self, queue: vk::Queue, present: &PresentDesc) -> VulkanResult<bool> {
        let swapchains = [present.swapchain];
        let image_indices = [present.image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&present.wait)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        vk_check!("vkQueuePresentKHR", unsafe { self.swapchain_loader.queue_present(queue, &info) })
    }
}

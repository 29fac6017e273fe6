//! Images, image views and the layout transition table
//!
//! An [`Image`] tracks the layout it was last transitioned to. Transitions
//! are limited to the pairs listed in [`transition_barrier`]; every other
//! request is rejected and leaves the recorded layout untouched.

use ash::vk;
use std::sync::Arc;

use crate::vulkan::device::{ImageBarrier, ImageDesc, ImageViewDesc};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;
use crate::vulkan::rendering::commands::execute_one_time;

/// GPU-side usage state of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined, the state after creation
    Undefined,
    /// Destination of transfer commands
    TransferDstOptimal,
    /// Sampled from shaders
    ShaderReadOnlyOptimal,
    /// Depth/stencil attachment
    DepthStencilAttachmentOptimal,
    /// Color attachment
    ColorAttachmentOptimal,
    /// Ready for presentation
    PresentSrc,
}

impl ImageLayout {
    /// Every layout state
    pub const ALL: [Self; 6] = [
        Self::Undefined,
        Self::TransferDstOptimal,
        Self::ShaderReadOnlyOptimal,
        Self::DepthStencilAttachmentOptimal,
        Self::ColorAttachmentOptimal,
        Self::PresentSrc,
    ];

    /// Native layout value
    pub const fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::DepthStencilAttachmentOptimal => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::ColorAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// Barrier parameters for one legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Accesses that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage the barrier waits on
    pub src_stage: vk::PipelineStageFlags,
    /// Stage blocked until the barrier completes
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for `from -> to`, or `None` when the pair is not supported
pub const fn transition_barrier(from: ImageLayout, to: ImageLayout) -> Option<LayoutTransition> {
    use ImageLayout::{DepthStencilAttachmentOptimal, ShaderReadOnlyOptimal, TransferDstOptimal, Undefined};

    match (from, to) {
        (Undefined, TransferDstOptimal) => Some(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (TransferDstOptimal, ShaderReadOnlyOptimal) => Some(LayoutTransition {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (Undefined, DepthStencilAttachmentOptimal) => Some(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::from_raw(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
            ),
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        _ => None,
    }
}

/// Whether a depth format carries a stencil component
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect flags used for views and barriers of `format`
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        f if has_stencil(f) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Bytes per texel for the formats the renderer uploads
pub fn texel_size(format: vk::Format) -> Option<u64> {
    match format {
        vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::D32_SFLOAT => Some(4),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Parameters of an image and its view
#[derive(Debug, Clone, Copy)]
pub struct ImageSpec {
    /// Texel extent
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub properties: vk::MemoryPropertyFlags,
    /// Number of array layers
    pub array_layers: u32,
    /// Type of the default view
    pub view_type: vk::ImageViewType,
}

impl ImageSpec {
    /// Device-local single-layer 2D image
    pub const fn texture_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            array_layers: 1,
            view_type: vk::ImageViewType::TYPE_2D,
        }
    }

    /// Device-local six-layer cube image
    pub const fn cube(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self { array_layers: 6, view_type: vk::ImageViewType::CUBE, ..Self::texture_2d(extent, format, usage) }
    }

    /// Device-local layered 2D image viewed as a 2D array
    pub const fn array_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags, layers: u32) -> Self {
        Self {
            array_layers: layers,
            view_type: vk::ImageViewType::TYPE_2D_ARRAY,
            ..Self::texture_2d(extent, format, usage)
        }
    }

    /// Depth attachment
    pub const fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self::texture_2d(extent, format, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
    }
}

/// GPU image with bound memory, a default view, and a tracked layout
pub struct Image {
    ctx: Arc<DeviceContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    spec: ImageSpec,
    aspect: vk::ImageAspectFlags,
    layout: ImageLayout,
}

impl Image {
    /// Create an image, bind memory to it and create its view
    pub fn new(ctx: &Arc<DeviceContext>, spec: ImageSpec) -> VulkanResult<Self> {
        if spec.extent.width == 0 || spec.extent.height == 0 || spec.array_layers == 0 {
            return Err(VulkanError::InvalidOperation { reason: format!("Invalid image extent {:?}", spec.extent) });
        }
        let device = ctx.device();
        let flags = if spec.view_type == vk::ImageViewType::CUBE {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image = device.create_image(&ImageDesc {
            extent: vk::Extent3D { width: spec.extent.width, height: spec.extent.height, depth: 1 },
            format: spec.format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: spec.usage,
            mip_levels: 1,
            array_layers: spec.array_layers,
            flags,
        })
        .at_call_site()?;

        let aspect = aspect_for_format(spec.format);
        let (memory, view) = match Self::bind_and_view(ctx, image, &spec, aspect) {
            Ok(parts) => parts,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };
        log::debug!(
            "Created {}x{} image ({:?}, {} layer(s))",
            spec.extent.width,
            spec.extent.height,
            spec.format,
            spec.array_layers
        );

        Ok(Self { ctx: Arc::clone(ctx), image, memory, view, spec, aspect, layout: ImageLayout::Undefined })
    }

    fn bind_and_view(
        ctx: &DeviceContext,
        image: vk::Image,
        spec: &ImageSpec,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<(vk::DeviceMemory, vk::ImageView)> {
        let device = ctx.device();
        let requirements = device.image_memory_requirements(image);
        let memory_type = ctx.find_memory_type(requirements.memory_type_bits, spec.properties)?;
        let memory = device.allocate_memory(requirements.size, memory_type).at_call_site()?;
        let view = device.bind_image_memory(image, memory).at_call_site().and_then(|()| {
            device.create_image_view(&ImageViewDesc {
                image,
                view_type: spec.view_type,
                format: spec.format,
                aspect,
                mip_levels: 1,
                layer_count: spec.array_layers,
            })
            .at_call_site()
        });
        match view {
            Ok(view) => Ok((memory, view)),
            Err(e) => {
                device.free_memory(memory);
                Err(e)
            }
        }
    }

    /// Get image handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// Default view covering every layer
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Texel extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.spec.extent
    }

    /// Texel format
    pub const fn format(&self) -> vk::Format {
        self.spec.format
    }

    /// Number of array layers
    pub const fn array_layers(&self) -> u32 {
        self.spec.array_layers
    }

    /// Type of the default view
    pub const fn view_type(&self) -> vk::ImageViewType {
        self.spec.view_type
    }

    /// Aspect used for views and barriers
    pub const fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Layout the image was last transitioned to
    pub const fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Tightly packed size of every layer, if the format's texel size is known
    pub fn byte_size(&self) -> Option<u64> {
        let texel = texel_size(self.spec.format)?;
        Some(
            u64::from(self.spec.extent.width)
                * u64::from(self.spec.extent.height)
                * u64::from(self.spec.array_layers)
                * texel,
        )
    }

    /// Transition to `new_layout` with a blocking one-time barrier
    ///
    /// Fails with [`VulkanError::UnsupportedLayoutTransition`] for pairs
    /// outside the transition table; the tracked layout only changes once
    /// the barrier has executed.
    pub fn transition_layout(&mut self, new_layout: ImageLayout) -> VulkanResult<()> {
        let transition = transition_barrier(self.layout, new_layout)
            .ok_or(VulkanError::UnsupportedLayoutTransition { from: self.layout, to: new_layout })?;
        let barrier = ImageBarrier {
            image: self.image,
            old_layout: self.layout.to_vk(),
            new_layout: new_layout.to_vk(),
            src_access: transition.src_access,
            dst_access: transition.dst_access,
            aspect: self.aspect,
            mip_levels: 1,
            layer_count: self.spec.array_layers,
        };
        execute_one_time(&self.ctx, |recorder| {
            recorder.pipeline_barrier(transition.src_stage, transition.dst_stage, &barrier);
            Ok(())
        })?;
        log::trace!("Image layout {:?} -> {:?}", self.layout, new_layout);
        self.layout = new_layout;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_layout(&mut self, layout: ImageLayout) {
        self.layout = layout;
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = self.ctx.device();
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
        device.free_memory(self.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::HeadlessDevice;
    use crate::vulkan::initialization::adapter::QueueFamilies;

    fn context(device: &Arc<HeadlessDevice>) -> Arc<DeviceContext> {
        DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0).unwrap()
    }

    fn extent() -> vk::Extent2D {
        vk::Extent2D { width: 4, height: 4 }
    }

    #[test]
    fn test_transition_table_is_closed() {
        let supported = ImageLayout::ALL
            .iter()
            .flat_map(|&from| ImageLayout::ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| transition_barrier(from, to).is_some())
            .count();
        assert_eq!(supported, 3);
    }

    #[test]
    fn test_supported_transition_updates_layout() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        let mut image = Image::new(&ctx, ImageSpec::texture_2d(extent(), vk::Format::R8G8B8A8_SRGB, usage)).unwrap();
        image.transition_layout(ImageLayout::TransferDstOptimal).unwrap();
        assert_eq!(image.layout(), ImageLayout::TransferDstOptimal);
        image.transition_layout(ImageLayout::ShaderReadOnlyOptimal).unwrap();
        assert_eq!(image.layout(), ImageLayout::ShaderReadOnlyOptimal);
    }

    #[test]
    fn test_every_unsupported_pair_is_rejected() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        let mut image = Image::new(&ctx, ImageSpec::texture_2d(extent(), vk::Format::R8G8B8A8_SRGB, usage)).unwrap();
        for from in ImageLayout::ALL {
            for to in ImageLayout::ALL {
                if transition_barrier(from, to).is_some() {
                    continue;
                }
                image.force_layout(from);
                let err = image.transition_layout(to).unwrap_err();
                assert_eq!(err, VulkanError::UnsupportedLayoutTransition { from, to });
                assert_eq!(image.layout(), from);
            }
        }
        assert_eq!(device.submitted_count(), 0);
    }

    #[test]
    fn test_depth_transition_uses_depth_aspect() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let mut depth = Image::new(&ctx, ImageSpec::depth(extent(), vk::Format::D32_SFLOAT)).unwrap();
        assert_eq!(depth.aspect(), vk::ImageAspectFlags::DEPTH);
        depth.transition_layout(ImageLayout::DepthStencilAttachmentOptimal).unwrap();
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_cube_image_has_six_layers() {
        let device = Arc::new(HeadlessDevice::default());
        let ctx = context(&device);
        let cube =
            Image::new(&ctx, ImageSpec::cube(extent(), vk::Format::R8G8B8A8_SRGB, vk::ImageUsageFlags::SAMPLED)).unwrap();
        assert_eq!(cube.array_layers(), 6);
        assert_eq!(cube.byte_size(), Some(4 * 4 * 6 * 4));
        assert_eq!(device.view_image(cube.view()), Some(cube.handle()));
    }

    #[test]
    fn test_transition_executes_and_frees_command_buffer() {
        let device = Arc::new(HeadlessDevice::manual());
        let ctx = context(&device);
        let usage = vk::ImageUsageFlags::TRANSFER_DST;
        let mut image = Image::new(&ctx, ImageSpec::texture_2d(extent(), vk::Format::R8G8B8A8_SRGB, usage)).unwrap();
        let live_before = device.live_count();
        image.transition_layout(ImageLayout::TransferDstOptimal).unwrap();
        assert_eq!(device.completed_count(), 1);
        assert_eq!(device.live_count(), live_before);
    }
}

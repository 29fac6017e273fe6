//! Sampled textures uploaded through a staging buffer

use ash::vk;
use std::sync::Arc;

use super::buffer::{Buffer, HOST_MEMORY};
use super::image::{Image, ImageLayout, ImageSpec};
use crate::vulkan::device::{DescriptorWrite, SamplerDesc};
use crate::vulkan::error::{CallSite, VulkanError, VulkanResult};
use crate::vulkan::initialization::DeviceContext;

/// Texel format of uploaded textures
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

const BYTES_PER_PIXEL: u64 = 4;

/// Sampler with RAII cleanup
pub struct Sampler {
    ctx: Arc<DeviceContext>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Nearest filtering, repeat addressing, anisotropy at the adapter maximum
    pub fn nearest_repeat(ctx: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let sampler = ctx.device().create_sampler(&SamplerDesc {
            filter: vk::Filter::NEAREST,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: Some(ctx.max_anisotropy()),
        })
        .at_call_site()?;
        Ok(Self { ctx: Arc::clone(ctx), sampler })
    }

    /// Get sampler handle
    pub const fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.ctx.device().destroy_sampler(self.sampler);
    }
}

/// Device-local sampled image with its sampler and material descriptor set
pub struct Texture {
    image: Image,
    sampler: Sampler,
    descriptor_set: Option<vk::DescriptorSet>,
    staging_handle: vk::Buffer,
}

impl Texture {
    /// Upload tightly packed RGBA8 pixels as a 2D texture
    pub fn from_rgba(ctx: &Arc<DeviceContext>, pixels: &[u8], width: u32, height: u32) -> VulkanResult<Self> {
        Self::upload(ctx, &[pixels], width, height, vk::ImageViewType::TYPE_2D)
    }

    /// Upload six RGBA8 faces as a cube texture
    ///
    /// Every face must hold exactly `width * height * 4` bytes; a mismatch
    /// fails before any GPU object is created.
    pub fn cube_from_faces(ctx: &Arc<DeviceContext>, faces: &[&[u8]], width: u32, height: u32) -> VulkanResult<Self> {
        if faces.len() != 6 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Cube texture needs 6 faces, got {}", faces.len()),
            });
        }
        Self::upload(ctx, faces, width, height, vk::ImageViewType::CUBE)
    }

    /// Upload one or more RGBA8 layers as a 2D array texture
    ///
    /// Layers follow the same size rule as cube faces.
    pub fn array_from_layers(
        ctx: &Arc<DeviceContext>,
        layers: &[&[u8]],
        width: u32,
        height: u32,
    ) -> VulkanResult<Self> {
        if layers.is_empty() {
            return Err(VulkanError::InvalidOperation { reason: "Array texture needs at least one layer".to_string() });
        }
        Self::upload(ctx, layers, width, height, vk::ImageViewType::TYPE_2D_ARRAY)
    }

    fn upload(
        ctx: &Arc<DeviceContext>,
        layers: &[&[u8]],
        width: u32,
        height: u32,
        view_type: vk::ImageViewType,
    ) -> VulkanResult<Self> {
        if width == 0 || height == 0 {
            return Err(VulkanError::InvalidOperation { reason: format!("Invalid texture extent {width}x{height}") });
        }
        let layer_size = u64::from(width) * u64::from(height) * BYTES_PER_PIXEL;
        if let Some(layer) = layers.iter().find(|layer| layer.len() as u64 != layer_size) {
            return Err(VulkanError::SizeMismatch { expected: layer_size, actual: layer.len() as u64 });
        }

        let mut staging =
            Buffer::new(ctx, layer_size * layers.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY)?;
        staging.map()?;
        for (index, layer) in layers.iter().enumerate() {
            staging.write_mapped(index as u64 * layer_size, layer)?;
        }
        staging.unmap();

        let extent = vk::Extent2D { width, height };
        let usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        let spec = match view_type {
            vk::ImageViewType::CUBE => ImageSpec::cube(extent, TEXTURE_FORMAT, usage),
            vk::ImageViewType::TYPE_2D_ARRAY => {
                ImageSpec::array_2d(extent, TEXTURE_FORMAT, usage, layers.len() as u32)
            }
            _ => ImageSpec::texture_2d(extent, TEXTURE_FORMAT, usage),
        };
        let mut image = Image::new(ctx, spec)?;
        image.transition_layout(ImageLayout::TransferDstOptimal)?;
        staging.copy_to_image(&image)?;
        image.transition_layout(ImageLayout::ShaderReadOnlyOptimal)?;

        let staging_handle = staging.handle();
        drop(staging);

        let sampler = Sampler::nearest_repeat(ctx)?;
        log::debug!("Uploaded {width}x{height} texture with {} layer(s)", layers.len());
        Ok(Self { image, sampler, descriptor_set: None, staging_handle })
    }

    /// Point `set` at this texture's view and sampler and remember it as the material set
    pub fn attach_descriptor_set(&mut self, ctx: &DeviceContext, set: vk::DescriptorSet) {
        ctx.device().update_descriptor_sets(&[DescriptorWrite::CombinedImageSampler {
            set,
            binding: 0,
            view: self.image.view(),
            sampler: self.sampler.handle(),
        }]);
        self.descriptor_set = Some(set);
    }

    /// Material descriptor set, once attached
    pub const fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptor_set
    }

    /// The uploaded image
    pub const fn image(&self) -> &Image {
        &self.image
    }

    /// Sampler handle
    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    /// Handle the staging buffer had during upload; it is destroyed by the time the texture exists
    pub const fn staging_handle(&self) -> vk::Buffer {
        self.staging_handle
    }
}

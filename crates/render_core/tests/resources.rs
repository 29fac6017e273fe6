//! Buffer, image and texture behaviour through the renderer's creation calls

mod common;

use ash::vk;
use render_core::config::RendererConfig;
use render_core::vulkan::device::HeadlessDevice;
use render_core::vulkan::error::VulkanError;
use render_core::vulkan::resources::buffer::HOST_MEMORY;
use render_core::vulkan::resources::image::{transition_barrier, ImageLayout};
use std::sync::Arc;

#[test]
fn test_buffers_report_requested_size() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());

    let usages = [
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::BufferUsageFlags::TRANSFER_SRC,
    ];
    let properties = [vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST_MEMORY];
    for size in [1, 3, 64, 4096, 1 << 20] {
        for usage in usages {
            for props in properties {
                let handle = renderer.create_buffer(size, usage, props).unwrap();
                let buffer = renderer.buffer(handle).unwrap();
                assert_eq!(buffer.size(), size);
                assert_eq!(device.buffer_contents(buffer.handle()).map(|b| b.len() as u64), Some(size));
            }
        }
    }
}

#[test]
fn test_mapped_round_trip_for_every_prefix() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let size = 96;
    let handle = renderer.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY).unwrap();
    let buffer = renderer.buffer_mut(handle).unwrap();

    let full: Vec<u8> = (0..size as u8).map(|b| b.wrapping_mul(7)).collect();
    buffer.set_memory(&full).unwrap();
    assert!(!buffer.is_mapped());
    assert_eq!(device.buffer_contents(buffer.handle()).unwrap(), full);

    buffer.map().unwrap();
    for n in 1..=size as usize {
        let data: Vec<u8> = (0..n).map(|i| (i * 13 + n) as u8).collect();
        buffer.write_mapped(0, &data).unwrap();
        assert_eq!(buffer.read_mapped(0, n).unwrap(), data);
    }
    assert!(matches!(buffer.write_mapped(size - 1, &[0, 0]), Err(VulkanError::OutOfBounds { .. })));
}

#[test]
fn test_allocation_failure_leaves_nothing_behind() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let before = device.live_count();
    device.fail_next_allocation();
    let result =
        renderer.create_buffer(256, vk::BufferUsageFlags::VERTEX_BUFFER, vk::MemoryPropertyFlags::DEVICE_LOCAL);
    assert!(result.is_err());
    assert_eq!(device.live_count(), before);
}

#[test]
fn test_layout_transitions_follow_the_table() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let extent = vk::Extent2D { width: 8, height: 8 };
    let color_usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;

    // Each reachable starting layout, with the path that reaches it
    let paths: [(vk::Format, vk::ImageUsageFlags, &[ImageLayout]); 4] = [
        (vk::Format::R8G8B8A8_SRGB, color_usage, &[]),
        (vk::Format::R8G8B8A8_SRGB, color_usage, &[ImageLayout::TransferDstOptimal]),
        (
            vk::Format::R8G8B8A8_SRGB,
            color_usage,
            &[ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal],
        ),
        (
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            &[ImageLayout::DepthStencilAttachmentOptimal],
        ),
    ];

    for (format, usage, path) in paths {
        for target in ImageLayout::ALL {
            let handle =
                renderer.create_image(extent, format, usage, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
            let image = renderer.image_mut(handle).unwrap();
            for &step in path {
                image.transition_layout(step).unwrap();
            }
            let from = image.layout();
            let result = image.transition_layout(target);
            if transition_barrier(from, target).is_some() {
                result.unwrap();
                assert_eq!(image.layout(), target);
            } else {
                assert_eq!(result, Err(VulkanError::UnsupportedLayoutTransition { from, to: target }));
                assert_eq!(image.layout(), from);
            }
            renderer.destroy_image(handle).unwrap();
        }
    }
}

#[test]
fn test_texture_upload_end_to_end() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let pixels = common::gradient(256, 256);
    assert_eq!(pixels.len(), 256 * 256 * 4);

    let handle = renderer.load_texture(&pixels, 256, 256).unwrap();
    let texture = renderer.texture(handle).unwrap();
    assert_eq!(texture.image().layout(), ImageLayout::ShaderReadOnlyOptimal);
    assert!(!device.is_live(texture.staging_handle()));
    assert_eq!(device.image_contents(texture.image().handle()).unwrap(), pixels);
    assert!(texture.descriptor_set().is_some());
}

#[test]
fn test_mismatched_cube_faces_rejected_before_any_allocation() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let face = common::gradient(4, 4);
    let short = common::gradient(4, 2);
    let before = device.live_count();

    let (face, short) = (face.as_slice(), short.as_slice());
    let faces = [face, face, face, short, face, face];
    assert_eq!(
        renderer.load_texture_layers(&faces, 4, 4).err(),
        Some(VulkanError::SizeMismatch { expected: 64, actual: 32 })
    );
    assert_eq!(device.live_count(), before);

    let faces = [face; 6];
    let handle = renderer.load_texture_layers(&faces, 4, 4).unwrap();
    assert_eq!(renderer.texture(handle).unwrap().image().array_layers(), 6);
}

#[test]
fn test_array_texture_keeps_every_layer() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let layers: Vec<Vec<u8>> = (0..4u8).map(|layer| vec![layer; 64]).collect();
    let refs: Vec<&[u8]> = layers.iter().map(Vec::as_slice).collect();

    let handle = renderer.load_texture_array(&refs, 4, 4).unwrap();
    let image = renderer.texture(handle).unwrap().image();
    assert_eq!(image.array_layers(), 4);
    assert_eq!(image.view_type(), vk::ImageViewType::TYPE_2D_ARRAY);
    assert_eq!(device.image_contents(image.handle()).unwrap(), layers.concat());
}

//! Memory type selection and configuration-driven setup

mod common;

use ash::vk;
use render_core::config::{Config, PresentModePreference, RendererConfig};
use render_core::renderer::Renderer;
use render_core::vulkan::device::{HeadlessConfig, HeadlessDevice};
use render_core::vulkan::error::VulkanError;
use render_core::vulkan::initialization::adapter::find_memory_type;
use render_core::vulkan::rendering::pipeline::ShaderModule;
use std::sync::Arc;

#[test]
fn test_memory_type_respects_type_bits() {
    let types = vec![
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    ];
    let config = HeadlessConfig { memory_types: types.clone(), ..HeadlessConfig::default() };
    let device = Arc::new(HeadlessDevice::new(config));
    let ctx = common::context(&device);

    assert_eq!(ctx.find_memory_type(0b0110, vk::MemoryPropertyFlags::DEVICE_LOCAL), Ok(1));
    assert_eq!(find_memory_type(&types, 0b0110, vk::MemoryPropertyFlags::DEVICE_LOCAL), Ok(1));
    assert_eq!(
        ctx.find_memory_type(0b0100, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        Err(VulkanError::NoCompatibleMemoryType { type_bits: 0b0100, required: vk::MemoryPropertyFlags::DEVICE_LOCAL })
    );
}

#[test]
fn test_renderer_built_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("viewer.toml");
    std::fs::write(
        &path,
        "application_name = \"config test\"\n\
         max_frames_in_flight = 3\n\
         fence_timeout_ms = 250\n\
         preferred_present_mode = \"Mailbox\"\n\
         [window]\n\
         width = 1280\n\
         height = 720\n",
    )
    .unwrap();

    let config = RendererConfig::load_from_file(&path).unwrap();
    assert_eq!(config.preferred_present_mode, PresentModePreference::Mailbox);
    let device = Arc::new(HeadlessDevice::default());
    let renderer = common::renderer(&device, &config);
    assert_eq!(renderer.frames_in_flight(), 3);
    let extent = renderer.swapchain().extent().unwrap();
    assert_eq!((extent.width, extent.height), (800, 600));
}

#[test]
fn test_missing_shaders_fail_initialization() {
    let device = Arc::new(HeadlessDevice::default());
    let config = RendererConfig::default().with_shaders("missing/vert.spv", "missing/frag.spv");
    let result = Renderer::from_config(common::context(&device), &config);
    assert!(matches!(result, Err(VulkanError::InitializationFailed(_))));
}

#[test]
fn test_out_of_range_frames_fail_initialization() {
    let device = Arc::new(HeadlessDevice::default());
    let ctx = common::context(&device);
    let vertex = ShaderModule::from_bytes(&ctx, &common::SPIRV_HEADER).unwrap();
    let fragment = ShaderModule::from_bytes(&ctx, &common::SPIRV_HEADER).unwrap();
    let config = RendererConfig::default().with_frames_in_flight(9);
    let result = Renderer::new(Arc::clone(&ctx), &config, &vertex, &fragment);
    assert!(matches!(result, Err(VulkanError::InitializationFailed(_))));
}

#[test]
fn test_teardown_releases_every_native_object() {
    let device = Arc::new(HeadlessDevice::default());
    {
        let mut renderer = common::renderer(&device, &RendererConfig::default());
        let (vertices, indices) = common::triangle();
        let mesh = renderer.create_mesh(&vertices, &indices).unwrap();
        let texture = renderer.load_texture(&common::gradient(16, 16), 16, 16).unwrap();
        renderer
            .run(
                |r| r.frame_counter() == 5,
                |r, frame| r.record_draw(frame, &render_core::scene::Drawable::new(mesh, texture)),
            )
            .unwrap();
    }
    assert_eq!(device.live_count(), 0);
    assert_eq!(device.invalid_frees(), 0);
}

//! Shared fixtures for the integration tests
#![allow(dead_code)]

use render_core::config::RendererConfig;
use render_core::renderer::Renderer;
use render_core::vulkan::device::HeadlessDevice;
use render_core::vulkan::initialization::adapter::QueueFamilies;
use render_core::vulkan::initialization::DeviceContext;
use render_core::vulkan::rendering::pipeline::ShaderModule;
use render_core::vulkan::resources::mesh::Vertex;
use render_core::vulkan::state::frame_loop::{FrameBegin, FrameContext};
use std::sync::Arc;

/// Smallest byte sequence accepted as SPIR-V: magic number plus version
pub const SPIRV_HEADER: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

pub fn context(device: &Arc<HeadlessDevice>) -> Arc<DeviceContext> {
    DeviceContext::new(device.clone(), "headless", QueueFamilies { graphics: 0, present: 0 }, 16.0).unwrap()
}

pub fn renderer(device: &Arc<HeadlessDevice>, config: &RendererConfig) -> Renderer {
    let ctx = context(device);
    let vertex = ShaderModule::from_bytes(&ctx, &SPIRV_HEADER).unwrap();
    let fragment = ShaderModule::from_bytes(&ctx, &SPIRV_HEADER).unwrap();
    Renderer::new(ctx, config, &vertex, &fragment).unwrap()
}

pub fn ready(begin: FrameBegin) -> FrameContext {
    match begin {
        FrameBegin::Ready(frame) => frame,
        FrameBegin::SwapchainStale => panic!("expected an acquired frame"),
    }
}

pub fn triangle() -> (Vec<Vertex>, Vec<u32>) {
    let vertices = vec![
        Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]),
        Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
        Vertex::new([0.0, 0.5, 0.0], [0.0, 0.0, 1.0], [0.5, 1.0]),
    ];
    (vertices, vec![0, 1, 2])
}

/// RGBA8 pixels where each texel encodes its own coordinates
pub fn gradient(width: u32, height: u32) -> Vec<u8> {
    (0..height)
        .flat_map(|y| (0..width).flat_map(move |x| [x as u8, y as u8, (x ^ y) as u8, 255]))
        .collect()
}

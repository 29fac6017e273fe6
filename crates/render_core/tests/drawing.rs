//! Recording drawables through the frame boundary

mod common;

use nalgebra::{Matrix4, Vector3};
use render_core::config::RendererConfig;
use render_core::scene::{Drawable, Transform};
use render_core::vulkan::device::{DescriptorWrite, HeadlessDevice};
use render_core::vulkan::rendering::frame_recorder::DrawStats;
use render_core::vulkan::rendering::pipeline::FrameUniforms;
use std::sync::Arc;

#[test]
fn test_repeated_bindings_are_elided() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let (vertices, indices) = common::triangle();
    let first_mesh = renderer.create_mesh(&vertices, &indices).unwrap();
    let second_mesh = renderer.create_mesh(&vertices, &indices).unwrap();
    let texture = renderer.load_texture(&common::gradient(2, 2), 2, 2).unwrap();

    let left = Drawable {
        transform: Transform::from_position(Vector3::new(-1.0, 0.0, 0.0)),
        ..Drawable::new(first_mesh, texture)
    };
    let right = Drawable { transform: Transform::from_position(Vector3::new(1.0, 0.0, 0.0)), ..left };
    let other = Drawable::new(second_mesh, texture);

    let mut frame = common::ready(renderer.begin_frame().unwrap());
    for drawable in [&left, &right, &other] {
        renderer.record_draw(&mut frame, drawable).unwrap();
    }
    let stats = renderer.end_frame(frame).unwrap();

    // First draw binds vertex, index and material; the second binds nothing;
    // the third rebinds only the mesh buffers.
    assert_eq!(stats, DrawStats { draws: 3, binds: 5, elided_binds: 4 });
    assert_eq!(renderer.last_stats(), stats);
}

#[test]
fn test_uniforms_land_in_the_frame_slot() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let view = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -3.0));
    let projection = Matrix4::new_perspective(4.0 / 3.0, 1.0, 0.1, 100.0);
    let uniforms = FrameUniforms::new(&view, &projection);

    let frame = common::ready(renderer.begin_frame().unwrap());
    renderer.update_uniform(&frame, &uniforms).unwrap();
    renderer.end_frame(frame).unwrap();

    let slot_zero = device
        .descriptor_writes()
        .into_iter()
        .find_map(|write| match write {
            DescriptorWrite::UniformBuffer { buffer, .. } => Some(buffer),
            DescriptorWrite::CombinedImageSampler { .. } => None,
        })
        .unwrap();
    assert_eq!(device.buffer_contents(slot_zero).unwrap(), bytemuck::bytes_of(&uniforms));
}

#[test]
fn test_each_frame_rerecords_from_scratch() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default().with_frames_in_flight(1));
    let (vertices, indices) = common::triangle();
    let mesh = renderer.create_mesh(&vertices, &indices).unwrap();
    let texture = renderer.load_texture(&common::gradient(2, 2), 2, 2).unwrap();
    let drawable = Drawable::new(mesh, texture);

    for _ in 0..3 {
        let mut frame = common::ready(renderer.begin_frame().unwrap());
        renderer.record_draw(&mut frame, &drawable).unwrap();
        let stats = renderer.end_frame(frame).unwrap();
        assert_eq!(stats, DrawStats { draws: 1, binds: 3, elided_binds: 0 });
    }
    assert_eq!(device.presented_count(), 3);
}

//! Swapchain rebuilds on surface changes

mod common;

use ash::vk;
use render_core::config::RendererConfig;
use render_core::vulkan::device::HeadlessDevice;
use render_core::vulkan::state::frame_loop::FrameBegin;
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_out_of_date_acquire_rebuilds_everything() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let old_framebuffers = renderer.swapchain().framebuffer_handles();
    let old_views = renderer.swapchain().view_handles();
    let old_depth = renderer.swapchain().depth_view().unwrap();
    let old_chain = renderer.swapchain().swapchain_handle().unwrap();

    device.set_surface_extent(vk::Extent2D { width: 1024, height: 768 });
    assert!(matches!(renderer.begin_frame().unwrap(), FrameBegin::SwapchainStale));
    assert_eq!(renderer.swapchain().generation(), 1);

    let chain = renderer.swapchain();
    let extent = chain.extent().unwrap();
    assert_eq!((extent.width, extent.height), (1024, 768));
    assert_ne!(chain.swapchain_handle().unwrap(), old_chain);
    assert_ne!(chain.depth_view().unwrap(), old_depth);
    for framebuffer in chain.framebuffer_handles() {
        let fb_extent = device.framebuffer_extent(framebuffer).unwrap();
        assert_eq!((fb_extent.width, fb_extent.height), (1024, 768));
    }

    let new_framebuffers: HashSet<_> = chain.framebuffer_handles().into_iter().collect();
    let new_views: HashSet<_> = chain.view_handles().into_iter().collect();
    assert!(old_framebuffers.iter().all(|fb| !new_framebuffers.contains(fb) && !device.is_live(*fb)));
    assert!(old_views.iter().all(|view| !new_views.contains(view) && !device.is_live(*view)));
    assert!(!device.is_live(old_depth));

    let frame = common::ready(renderer.begin_frame().unwrap());
    renderer.end_frame(frame).unwrap();
}

#[test]
fn test_suboptimal_present_is_not_an_error() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    device.set_present_suboptimal(true);
    let frame = common::ready(renderer.begin_frame().unwrap());
    renderer.end_frame(frame).unwrap();
    assert_eq!(renderer.swapchain().generation(), 1);

    device.set_present_suboptimal(false);
    let frame = common::ready(renderer.begin_frame().unwrap());
    renderer.end_frame(frame).unwrap();
    assert_eq!(renderer.swapchain().generation(), 1);
    assert_eq!(device.presented_count(), 2);
}

#[test]
fn test_suboptimal_acquire_skips_the_frame() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    let submitted = device.submitted_count();
    device.set_acquire_suboptimal(true);
    assert!(matches!(renderer.begin_frame().unwrap(), FrameBegin::SwapchainStale));
    device.set_acquire_suboptimal(false);
    assert_eq!(renderer.frame_counter(), 0);
    // Recreation transitions the new depth image; no frame was submitted.
    assert_eq!(device.presented_count(), 0);
    assert!(device.submitted_count() > submitted);

    let frame = common::ready(renderer.begin_frame().unwrap());
    renderer.end_frame(frame).unwrap();
    assert_eq!(renderer.frame_counter(), 1);
}

#[test]
fn test_minimized_window_waits_for_a_real_size() {
    let device = Arc::new(HeadlessDevice::default());
    let mut renderer = common::renderer(&device, &RendererConfig::default());
    device.set_surface_extent(vk::Extent2D { width: 0, height: 0 });
    renderer.resize(0, 0);
    assert!(matches!(renderer.begin_frame().unwrap(), FrameBegin::SwapchainStale));
    assert_eq!(renderer.swapchain().generation(), 0);

    device.set_surface_extent(vk::Extent2D { width: 640, height: 480 });
    renderer.resize(640, 480);
    let frame = common::ready(renderer.begin_frame().unwrap());
    renderer.end_frame(frame).unwrap();
    assert_eq!(renderer.swapchain().generation(), 1);
    assert_eq!(renderer.aspect_ratio().unwrap(), 640.0 / 480.0);
}

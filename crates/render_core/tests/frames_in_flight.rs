//! Frames-in-flight bounds, driven by a device whose GPU work completes by hand

mod common;

use render_core::config::RendererConfig;
use render_core::vulkan::device::HeadlessDevice;
use render_core::vulkan::error::VulkanError;
use render_core::vulkan::state::frame_loop::FrameBegin;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn manual_renderer(frames: usize, timeout_ms: u64) -> (Arc<HeadlessDevice>, render_core::Renderer) {
    let device = Arc::new(HeadlessDevice::manual());
    let config = RendererConfig::default().with_frames_in_flight(frames).with_fence_timeout_ms(timeout_ms);
    let renderer = common::renderer(&device, &config);
    (device, renderer)
}

#[test]
fn test_extra_frame_waits_for_oldest_submission() {
    let (device, mut renderer) = manual_renderer(2, 30);

    for _ in 0..2 {
        let frame = common::ready(renderer.begin_frame().unwrap());
        renderer.end_frame(frame).unwrap();
    }
    assert_eq!(device.pending_submissions(), 2);

    let blocked = renderer.begin_frame();
    assert!(matches!(blocked, Err(VulkanError::DeviceTimeout { what: "in-flight fence", .. })));

    assert!(device.complete_next_submission());
    let frame = common::ready(renderer.begin_frame().unwrap());
    assert_eq!(frame.slot(), 0);
    renderer.end_frame(frame).unwrap();
    assert_eq!(device.pending_submissions(), 2);
}

#[test]
fn test_blocked_frame_resumes_when_gpu_finishes() {
    let (device, mut renderer) = manual_renderer(2, 5000);
    for _ in 0..2 {
        let frame = common::ready(renderer.begin_frame().unwrap());
        renderer.end_frame(frame).unwrap();
    }

    let completer = {
        let device = Arc::clone(&device);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            device.complete_next_submission()
        })
    };

    let start = Instant::now();
    let frame = common::ready(renderer.begin_frame().unwrap());
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(completer.join().unwrap());
    assert_eq!(device.completed_count(), device.submitted_count() - 1);
    renderer.end_frame(frame).unwrap();
}

#[test]
fn test_never_more_than_frames_in_flight() {
    for frames in 1..=3 {
        let (device, mut renderer) = manual_renderer(frames, 10);
        let mut presented = 0;
        while presented < 12 {
            match renderer.begin_frame() {
                Ok(FrameBegin::Ready(frame)) => {
                    renderer.end_frame(frame).unwrap();
                    presented += 1;
                }
                Ok(FrameBegin::SwapchainStale) => {}
                Err(VulkanError::DeviceTimeout { .. }) => {
                    assert!(device.complete_next_submission());
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(device.pending_submissions() <= frames);
        }
        assert!(device.peak_in_flight() <= frames);
        assert_eq!(renderer.frame_counter(), 12);
    }
}

#[test]
fn test_shutdown_drains_outstanding_work() {
    let (device, mut renderer) = manual_renderer(3, 10);
    for _ in 0..3 {
        let frame = common::ready(renderer.begin_frame().unwrap());
        renderer.end_frame(frame).unwrap();
    }
    assert_eq!(device.pending_submissions(), 3);
    renderer.shutdown().unwrap();
    assert_eq!(device.pending_submissions(), 0);
}

//! # Render Core
//!
//! GPU resource and frame pipeline for a Vulkan renderer.
//!
//! ## Features
//!
//! - **Device selection**: adapter requirements, queue families and memory type lookup
//! - **Resources**: buffers and images with bound memory, staged textures and meshes
//! - **Layout state machine**: a closed table of legal image layout transitions
//! - **Frames in flight**: fence and semaphore synchronization per frame slot
//! - **Swapchain lifecycle**: recreation on resize, out-of-date and suboptimal results
//! - **Headless device**: a software [`GpuDevice`](vulkan::device::GpuDevice) for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = Arc::new(HeadlessDevice::default());
//!     let ctx = DeviceContext::new(device, "headless", QueueFamilies { graphics: 0, present: 0 }, 1.0)?;
//!     let config = RendererConfig::default();
//!     let mut renderer = Renderer::from_config(ctx, &config)?;
//!
//!     let texture = renderer.load_texture(&[255; 4], 1, 1)?;
//!     let mesh = renderer.create_mesh(&[Vertex::default(); 3], &[0, 1, 2])?;
//!     let drawable = Drawable::new(mesh, texture);
//!
//!     renderer.run(
//!         |r| r.frame_counter() >= 60,
//!         |r, frame| r.record_draw(frame, &drawable),
//!     )?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod renderer;
pub mod scene;
pub mod vulkan;

pub use renderer::{BufferHandle, ImageHandle, MeshHandle, Renderer, TextureHandle};

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, PresentModePreference, RendererConfig},
        renderer::{BufferHandle, ImageHandle, MeshHandle, Renderer, TextureHandle},
        scene::{Drawable, Transform},
        vulkan::{
            device::HeadlessDevice,
            initialization::{adapter::QueueFamilies, DeviceContext},
            DrawStats, FrameBegin, FrameContext, FrameUniforms, ImageLayout, Vertex, VulkanError, VulkanResult,
        },
    };
}

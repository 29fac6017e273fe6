pub mod frame_loop;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;

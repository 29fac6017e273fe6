pub mod commands;
pub mod frame_recorder;
pub mod pipeline;
pub mod render_pass;

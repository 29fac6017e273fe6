//! Renderer configuration
//!
//! Process-level parameters: window size, frames in flight, validation
//! toggle, wait timeout, clear color, shader locations and present mode.
//! Every field has a default so partial files are accepted.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Config, ConfigError};
use crate::vulkan::state::frame_loop::MAX_FRAMES_IN_FLIGHT;

/// Window parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
    /// Window title
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { width: 800, height: 600, title: "Viewer".to_string() }
    }
}

/// Compiled SPIR-V shader locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    /// Vertex shader
    pub vertex: String,
    /// Fragment shader
    pub fragment: String,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: "target/shaders/textured.vert.spv".to_string(),
            fragment: "target/shaders/textured.frag.spv".to_string(),
        }
    }
}

/// Present mode to ask for; FIFO is used when the surface lacks it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// No vsync
    #[default]
    Immediate,
    /// Triple-buffered vsync
    Mailbox,
    /// Classic vsync
    Fifo,
}

impl PresentModePreference {
    /// Native present mode
    pub const fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Fifo => vk::PresentModeKHR::FIFO,
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for instance creation
    pub application_name: String,
    /// Window parameters
    pub window: WindowConfig,
    /// Frames that may be in flight at once
    pub max_frames_in_flight: usize,
    /// Whether to enable validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Fence and acquire timeout in milliseconds
    pub fence_timeout_ms: u64,
    /// RGBA clear color
    pub clear_color: [f32; 4],
    /// Shader locations
    pub shaders: ShaderPaths,
    /// Requested present mode
    pub preferred_present_mode: PresentModePreference,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Viewer")
    }
}

impl Config for RendererConfig {}

impl RendererConfig {
    /// Create a configuration with defaults for everything but the name
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            window: WindowConfig::default(),
            max_frames_in_flight: 2,
            enable_validation: None,
            fence_timeout_ms: 5000,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderPaths::default(),
            preferred_present_mode: PresentModePreference::default(),
        }
    }

    /// Set window size
    #[must_use]
    pub const fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set frames in flight
    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Force validation layers on or off
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the fence and acquire timeout
    #[must_use]
    pub const fn with_fence_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fence_timeout_ms = timeout_ms;
        self
    }

    /// Set the clear color
    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set shader locations
    #[must_use]
    pub fn with_shaders(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.shaders = ShaderPaths { vertex: vertex.into(), fragment: fragment.into() };
        self
    }

    /// Set the requested present mode
    #[must_use]
    pub const fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.preferred_present_mode = mode;
        self
    }

    /// Whether validation layers should be enabled
    pub const fn validation_enabled(&self) -> bool {
        match self.enable_validation {
            Some(enabled) => enabled,
            None => cfg!(debug_assertions),
        }
    }

    /// Fence and acquire timeout
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.max_frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "max_frames_in_flight must be within 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.max_frames_in_flight
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} has a zero dimension",
                self.window.width, self.window.height
            )));
        }
        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fence_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

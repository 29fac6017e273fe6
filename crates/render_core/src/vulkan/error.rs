//! Vulkan error types
//!
//! Every fallible operation in the core returns [`VulkanResult`]. Native call
//! failures are wrapped with the call name and source location through
//! [`vk_check!`](crate::vk_check) so they can be diagnosed from a log line.

use ash::vk;
use std::panic::Location;
use std::time::Duration;
use thiserror::Error;

use super::resources::image::ImageLayout;

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// A native API call returned a failure code
    #[error("[{file}:{line}]: {call} failed ({result:?})")]
    Api {
        /// Name of the failing call
        call: &'static str,
        /// Source file of the call site
        file: &'static str,
        /// Source line of the call site
        line: u32,
        /// Native result code
        result: vk::Result,
    },

    /// No adapter satisfied the device requirements
    #[error("No suitable adapter among {candidates} candidate(s)")]
    NoSuitableAdapter {
        /// Number of adapters that were considered
        candidates: usize,
    },

    /// No memory type matched the requested type bits and property flags
    #[error("No compatible memory type for type bits {type_bits:#b} with {required:?}")]
    NoCompatibleMemoryType {
        /// Memory type bits reported by the resource
        type_bits: u32,
        /// Property flags that were required
        required: vk::MemoryPropertyFlags,
    },

    /// Requested image layout transition is not in the transition table
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        /// Current layout of the image
        from: ImageLayout,
        /// Requested layout
        to: ImageLayout,
    },

    /// Host access to a buffer that is not mapped
    #[error("Buffer is not mapped")]
    BufferNotMapped,

    /// Data size does not match the size the resource was created with
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Size required by the resource
        expected: u64,
        /// Size that was supplied
        actual: u64,
    },

    /// Host access outside of a mapped range
    #[error("Access of {len} bytes at offset {offset} exceeds size {size}")]
    OutOfBounds {
        /// Byte offset of the access
        offset: u64,
        /// Length of the access
        len: u64,
        /// Size of the resource
        size: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A blocking wait on the device did not complete in time
    #[error("Timed out after {timeout:?} waiting for {what}")]
    DeviceTimeout {
        /// What was being waited on
        what: &'static str,
        /// Configured timeout
        timeout: Duration,
    },

    /// A handle did not resolve to a live resource
    #[error("Resource not found: {kind}")]
    ResourceNotFound {
        /// Kind of resource the handle refers to
        kind: &'static str,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

impl VulkanError {
    /// Native result code, if this error came from an API call
    pub const fn result(&self) -> Option<vk::Result> {
        match self {
            Self::Api { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// True when the surface no longer matches the swapchain
    pub fn is_out_of_date(&self) -> bool {
        self.result() == Some(vk::Result::ERROR_OUT_OF_DATE_KHR)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Attribute native call failures to the code that asked for them
///
/// [`vk_check!`](crate::vk_check) records where the native call was made,
/// which is always inside a [`GpuDevice`](super::device::GpuDevice)
/// implementation. Resource code appends `.at_call_site()` to device calls so
/// the error names the operation that failed instead.
pub trait CallSite<T> {
    /// Replace the location of an [`VulkanError::Api`] with the caller's
    #[track_caller]
    fn at_call_site(self) -> VulkanResult<T>;
}

impl<T> CallSite<T> for VulkanResult<T> {
    #[track_caller]
    fn at_call_site(self) -> VulkanResult<T> {
        let location = Location::caller();
        self.map_err(|error| match error {
            VulkanError::Api { call, result, .. } => {
                VulkanError::Api { call, file: location.file(), line: location.line(), result }
            }
            other => other,
        })
    }
}

/// Wrap a native `VkResult` with the call name and source location.
///
/// ```ignore
/// let buffer = vk_check!("vkCreateBuffer", unsafe { device.create_buffer(&info, None) })?;
/// ```
#[macro_export]
macro_rules! vk_check {
    ($call:expr, $result:expr) => {
        ($result).map_err(|result: ::ash::vk::Result| $crate::vulkan::VulkanError::Api {
            call: $call,
            file: file!(),
            line: line!(),
            result,
        })
    };
}

/// Build an [`VulkanError::Api`] for a result code at the call site.
#[macro_export]
macro_rules! vk_error {
    ($call:expr, $result:expr) => {
        $crate::vulkan::VulkanError::Api {
            call: $call,
            file: file!(),
            line: line!(),
            result: $result,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_check_captures_call_site() {
        let failed: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = crate::vk_check!("vkCreateBuffer", failed).unwrap_err();
        match &err {
            VulkanError::Api { call, file, line, result } => {
                assert_eq!(*call, "vkCreateBuffer");
                assert!(file.ends_with("error.rs"));
                assert!(*line > 0);
                assert_eq!(*result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            other => panic!("unexpected error {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("vkCreateBuffer"));
        assert!(message.contains("ERROR_OUT_OF_HOST_MEMORY"));
    }

    #[test]
    fn test_call_site_relocates_api_errors() {
        let failed: VulkanResult<()> = Err(crate::vk_error!("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        let expected_line = line!() + 1;
        let err = failed.at_call_site().unwrap_err();
        assert_eq!(
            err,
            VulkanError::Api {
                call: "vkAllocateMemory",
                file: file!(),
                line: expected_line,
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            }
        );

        let other: VulkanResult<()> = Err(VulkanError::BufferNotMapped);
        assert_eq!(other.at_call_site(), Err(VulkanError::BufferNotMapped));
    }

    #[test]
    fn test_out_of_date_detection() {
        let err = crate::vk_error!("vkAcquireNextImageKHR", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.is_out_of_date());
        assert!(!VulkanError::BufferNotMapped.is_out_of_date());
    }
}

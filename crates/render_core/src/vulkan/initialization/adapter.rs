//! Adapter selection and memory type lookup
//!
//! Everything here operates on plain [`AdapterInfo`] records so selection
//! rules can be exercised without a driver. The native instance fills the
//! records in [`VulkanInstance::enumerate_adapters`](super::instance::VulkanInstance::enumerate_adapters).

use ash::vk;
use bitflags::bitflags;

use crate::vulkan::error::{VulkanError, VulkanResult};

/// Device extension every adapter must expose
pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

/// Device extension that must be enabled whenever an adapter advertises it
pub const PORTABILITY_SUBSET_EXTENSION: &str = "VK_KHR_portability_subset";

bitflags! {
    /// Optional device features the renderer can require
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AdapterFeatures: u32 {
        /// Anisotropic texture filtering
        const SAMPLER_ANISOTROPY = 1 << 0;
        /// Geometry shader stage
        const GEOMETRY_SHADER = 1 << 1;
    }
}

impl AdapterFeatures {
    /// Features reported by a native feature struct
    pub fn from_vk(features: &vk::PhysicalDeviceFeatures) -> Self {
        let mut supported = Self::empty();
        supported.set(Self::SAMPLER_ANISOTROPY, features.sampler_anisotropy == vk::TRUE);
        supported.set(Self::GEOMETRY_SHADER, features.geometry_shader == vk::TRUE);
        supported
    }
}

/// Queue family as seen by adapter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Operations supported by the family
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the target surface
    pub supports_present: bool,
}

/// Capabilities of one physical adapter
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Human readable device name
    pub name: String,
    /// Native handle
    pub handle: vk::PhysicalDevice,
    /// Device class
    pub device_type: vk::PhysicalDeviceType,
    /// Queue families, indexed by family index
    pub queue_families: Vec<QueueFamilyInfo>,
    /// Supported device extension names
    pub extensions: Vec<String>,
    /// Supported optional features
    pub features: AdapterFeatures,
    /// Formats supported for the target surface
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    /// Present modes supported for the target surface
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Property flags of each memory type
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Largest supported sampler anisotropy
    pub max_anisotropy: f32,
}

/// Queue family indices chosen for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family used for graphics submission
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct families, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Constraints an adapter must satisfy
#[derive(Debug, Clone)]
pub struct AdapterRequirements {
    /// Device extensions that must be present
    pub extensions: Vec<String>,
    /// Features that must be supported
    pub features: AdapterFeatures,
    /// Reject integrated and software adapters
    pub require_discrete: bool,
}

impl Default for AdapterRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            features: AdapterFeatures::SAMPLER_ANISOTROPY,
            require_discrete: false,
        }
    }
}

impl AdapterInfo {
    /// First graphics family and first present-capable family
    pub fn find_queue_families(&self) -> Option<QueueFamilies> {
        let graphics = self
            .queue_families
            .iter()
            .position(|family| family.flags.contains(vk::QueueFlags::GRAPHICS))?;
        let present = self.queue_families.iter().position(|family| family.supports_present)?;
        Some(QueueFamilies { graphics: graphics as u32, present: present as u32 })
    }

    /// Whether the adapter advertises a device extension
    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|available| available == name)
    }

    /// Check every requirement, returning the chosen queue families or the first unmet constraint
    pub fn evaluate(&self, requirements: &AdapterRequirements) -> Result<QueueFamilies, String> {
        if requirements.require_discrete && self.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            return Err("not a discrete GPU".to_string());
        }
        let families = self
            .find_queue_families()
            .ok_or_else(|| "missing graphics or present queue family".to_string())?;
        if let Some(missing) = requirements.extensions.iter().find(|name| !self.supports_extension(name)) {
            return Err(format!("missing extension {missing}"));
        }
        if !self.features.contains(requirements.features) {
            return Err(format!("missing features {:?}", requirements.features - self.features));
        }
        if self.surface_formats.is_empty() {
            return Err("no surface formats".to_string());
        }
        if self.present_modes.is_empty() {
            return Err("no present modes".to_string());
        }
        Ok(families)
    }

    /// Extensions to enable on the logical device
    pub fn device_extensions(&self, requirements: &AdapterRequirements) -> Vec<String> {
        let mut extensions = requirements.extensions.clone();
        if self.supports_extension(PORTABILITY_SUBSET_EXTENSION)
            && !extensions.iter().any(|name| name == PORTABILITY_SUBSET_EXTENSION)
        {
            extensions.push(PORTABILITY_SUBSET_EXTENSION.to_string());
        }
        extensions
    }
}

/// Select the first adapter satisfying every requirement
pub fn select_adapter<'a>(
    candidates: &'a [AdapterInfo],
    requirements: &AdapterRequirements,
) -> VulkanResult<(&'a AdapterInfo, QueueFamilies)> {
    for candidate in candidates {
        match candidate.evaluate(requirements) {
            Ok(families) => {
                log::info!(
                    "Selected GPU: {} (graphics family {}, present family {})",
                    candidate.name,
                    families.graphics,
                    families.present
                );
                return Ok((candidate, families));
            }
            Err(reason) => log::debug!("Rejected GPU {}: {}", candidate.name, reason),
        }
    }
    Err(VulkanError::NoSuitableAdapter { candidates: candidates.len() })
}

/// First memory type allowed by `type_bits` whose flags include `required`
pub fn find_memory_type(
    memory_types: &[vk::MemoryPropertyFlags],
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    memory_types
        .iter()
        .enumerate()
        .take(32)
        .find(|(index, flags)| type_bits & (1 << index) != 0 && flags.contains(required))
        .map(|(index, _)| index as u32)
        .ok_or(VulkanError::NoCompatibleMemoryType { type_bits, required })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn adapter(name: &str) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            handle: vk::PhysicalDevice::from_raw(1),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: vec![QueueFamilyInfo {
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                supports_present: true,
            }],
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            features: AdapterFeatures::SAMPLER_ANISOTROPY,
            surface_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            memory_types: vec![vk::MemoryPropertyFlags::DEVICE_LOCAL],
            max_anisotropy: 16.0,
        }
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let types = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ];
        let index = find_memory_type(&types, 0b0110, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_find_memory_type_requires_superset() {
        let types = [vk::MemoryPropertyFlags::HOST_VISIBLE, vk::MemoryPropertyFlags::DEVICE_LOCAL];
        let required = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let err = find_memory_type(&types, 0b11, required).unwrap_err();
        assert_eq!(err, VulkanError::NoCompatibleMemoryType { type_bits: 0b11, required });
    }

    #[test]
    fn test_first_suitable_adapter_wins() {
        let mut unsuitable = adapter("no-present");
        unsuitable.queue_families[0].supports_present = false;
        let candidates = [unsuitable, adapter("first"), adapter("second")];
        let (selected, families) = select_adapter(&candidates, &AdapterRequirements::default()).unwrap();
        assert_eq!(selected.name, "first");
        assert_eq!(families, QueueFamilies { graphics: 0, present: 0 });
    }

    #[test]
    fn test_no_suitable_adapter() {
        let mut no_anisotropy = adapter("a");
        no_anisotropy.features = AdapterFeatures::empty();
        let mut no_swapchain = adapter("b");
        no_swapchain.extensions.clear();
        let mut no_modes = adapter("c");
        no_modes.present_modes.clear();
        let err = select_adapter(&[no_anisotropy, no_swapchain, no_modes], &AdapterRequirements::default())
            .unwrap_err();
        assert_eq!(err, VulkanError::NoSuitableAdapter { candidates: 3 });
    }

    #[test]
    fn test_queue_families_deduplicate() {
        let shared = QueueFamilies { graphics: 0, present: 0 };
        assert_eq!(shared.unique(), vec![0]);
        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn test_separate_present_family() {
        let mut info = adapter("split");
        info.queue_families = vec![
            QueueFamilyInfo { flags: vk::QueueFlags::GRAPHICS, supports_present: false },
            QueueFamilyInfo { flags: vk::QueueFlags::TRANSFER, supports_present: true },
        ];
        assert_eq!(info.find_queue_families(), Some(QueueFamilies { graphics: 0, present: 1 }));
    }

    #[test]
    fn test_portability_subset_enabled_when_advertised() {
        let mut info = adapter("portable");
        info.extensions.push(PORTABILITY_SUBSET_EXTENSION.to_string());
        let extensions = info.device_extensions(&AdapterRequirements::default());
        assert_eq!(extensions, vec![SWAPCHAIN_EXTENSION.to_string(), PORTABILITY_SUBSET_EXTENSION.to_string()]);
    }
}

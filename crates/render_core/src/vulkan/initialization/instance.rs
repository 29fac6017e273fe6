//! Vulkan instance, debug messenger and presentation surface

use ash::extensions::{ext::DebugUtils, khr::Surface};
use ash::{vk, Entry, Instance};
use std::ffi::{c_char, CStr, CString};

use super::adapter::{AdapterFeatures, AdapterInfo, QueueFamilyInfo};
use crate::vk_check;
use crate::vulkan::error::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const PORTABILITY_ENUMERATION_EXTENSION: &str = "VK_KHR_portability_enumeration";
// Required alongside portability enumeration on a 1.0 instance
const PHYSICAL_DEVICE_PROPERTIES2_EXTENSION: &str = "VK_KHR_get_physical_device_properties2";

/// Instance extensions and create flags for the given window requirements
///
/// Portability enumeration is enabled when the loader offers it, together
/// with `VK_KHR_get_physical_device_properties2`, which it depends on.
fn instance_extensions(
    window_extensions: &[String],
    available: &[String],
    validation: bool,
) -> (Vec<String>, vk::InstanceCreateFlags) {
    let mut names: Vec<String> = window_extensions.to_vec();
    let mut flags = vk::InstanceCreateFlags::empty();
    fn enable(names: &mut Vec<String>, name: &str) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    if available.iter().any(|ext| ext == PORTABILITY_ENUMERATION_EXTENSION) {
        enable(&mut names, PORTABILITY_ENUMERATION_EXTENSION);
        if available.iter().any(|ext| ext == PHYSICAL_DEVICE_PROPERTIES2_EXTENSION) {
            enable(&mut names, PHYSICAL_DEVICE_PROPERTIES2_EXTENSION);
        }
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }
    if validation {
        enable(&mut names, &DebugUtils::name().to_string_lossy());
    }
    (names, flags)
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Surface extension loader
    pub surface_loader: Surface,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance enabling the window system's required extensions
    ///
    /// With `enable_validation` the Khronos validation layer is enabled when
    /// installed, and its messages are forwarded to `log`.
    pub fn new(app_name: &str, window_extensions: &[String], enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new("render_core")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let available_extensions: Vec<String> =
            vk_check!("vkEnumerateInstanceExtensionProperties", entry.enumerate_instance_extension_properties(None))?
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy().into_owned())
                .collect();

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("{VALIDATION_LAYER} requested but not installed, continuing without validation");
        }
        let (extension_names, flags) = instance_extensions(window_extensions, &available_extensions, validation);

        let extension_cstrings = extension_names
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;
        let extension_ptrs: Vec<*const c_char> = extension_cstrings.iter().map(|ext| ext.as_ptr()).collect();

        let layer_names = if validation {
            vec![CString::new(VALIDATION_LAYER).map_err(|e| VulkanError::InitializationFailed(e.to_string()))?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = vk_check!("vkCreateInstance", unsafe { entry.create_instance(&create_info, None) })?;
        log::info!("Created Vulkan instance with extensions {extension_names:?}");

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        Ok(Self { entry, instance, surface_loader, debug })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = vk_check!("vkEnumerateInstanceLayerProperties", entry.enumerate_instance_layer_properties())?;
        Ok(layers.iter().any(|layer| {
            unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }.to_string_lossy() == VALIDATION_LAYER
        }))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        vk_check!("vkCreateDebugUtilsMessengerEXT", unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
        })
    }

    /// Native instance handle
    pub fn handle(&self) -> vk::Instance {
        self.instance.handle()
    }

    /// Describe every physical adapter against a target surface
    pub fn enumerate_adapters(&self, surface: &VulkanSurface) -> VulkanResult<Vec<AdapterInfo>> {
        let devices = vk_check!("vkEnumeratePhysicalDevices", unsafe { self.instance.enumerate_physical_devices() })?;
        devices.into_iter().map(|device| self.describe_adapter(device, surface.handle())).collect()
    }

    fn describe_adapter(&self, device: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VulkanResult<AdapterInfo> {
        let properties = unsafe { self.instance.get_physical_device_properties(device) };
        let features = unsafe { self.instance.get_physical_device_features(device) };
        let memory = unsafe { self.instance.get_physical_device_memory_properties(device) };
        let families = unsafe { self.instance.get_physical_device_queue_family_properties(device) };

        let queue_families = families
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let supports_present = vk_check!("vkGetPhysicalDeviceSurfaceSupportKHR", unsafe {
                    self.surface_loader
                        .get_physical_device_surface_support(device, index as u32, surface)
                })?;
                Ok(QueueFamilyInfo { flags: family.queue_flags, supports_present })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let extensions = vk_check!("vkEnumerateDeviceExtensionProperties", unsafe {
            self.instance.enumerate_device_extension_properties(device)
        })?
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect();

        let surface_formats = vk_check!("vkGetPhysicalDeviceSurfaceFormatsKHR", unsafe {
            self.surface_loader.get_physical_device_surface_formats(device, surface)
        })?;
        let present_modes = vk_check!("vkGetPhysicalDeviceSurfacePresentModesKHR", unsafe {
            self.surface_loader.get_physical_device_surface_present_modes(device, surface)
        })?;

        let memory_types = memory.memory_types[..memory.memory_type_count as usize]
            .iter()
            .map(|memory_type| memory_type.property_flags)
            .collect();

        Ok(AdapterInfo {
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy().into_owned(),
            handle: device,
            device_type: properties.device_type,
            queue_families,
            extensions,
            features: AdapterFeatures::from_vk(&features),
            surface_formats,
            present_modes,
            memory_types,
            max_anisotropy: properties.limits.max_sampler_anisotropy,
        })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Presentation surface, destroyed with its loader on drop
///
/// Must be dropped before the [`VulkanInstance`] it was created from.
pub struct VulkanSurface {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

impl VulkanSurface {
    /// Take ownership of a surface created by the window system
    pub fn from_raw(instance: &VulkanInstance, surface: vk::SurfaceKHR) -> Self {
        Self { loader: instance.surface_loader.clone(), surface }
    }

    /// Native surface handle
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_portability_brings_properties2() {
        let window = strings(&["VK_KHR_surface"]);
        let available = strings(&[
            "VK_KHR_surface",
            PORTABILITY_ENUMERATION_EXTENSION,
            PHYSICAL_DEVICE_PROPERTIES2_EXTENSION,
        ]);
        let (names, flags) = instance_extensions(&window, &available, false);
        assert_eq!(
            names,
            strings(&["VK_KHR_surface", PORTABILITY_ENUMERATION_EXTENSION, PHYSICAL_DEVICE_PROPERTIES2_EXTENSION])
        );
        assert!(flags.contains(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR));
    }

    #[test]
    fn test_plain_loader_gets_window_extensions_only() {
        let window = strings(&["VK_KHR_surface", "VK_KHR_xcb_surface"]);
        let available = strings(&["VK_KHR_surface", "VK_KHR_xcb_surface", PHYSICAL_DEVICE_PROPERTIES2_EXTENSION]);
        let (names, flags) = instance_extensions(&window, &available, true);
        assert_eq!(names, strings(&["VK_KHR_surface", "VK_KHR_xcb_surface", "VK_EXT_debug_utils"]));
        assert!(flags.is_empty());
    }

    #[test]
    fn test_extensions_are_not_duplicated() {
        let window = strings(&["VK_KHR_surface", PHYSICAL_DEVICE_PROPERTIES2_EXTENSION]);
        let available = strings(&[PORTABILITY_ENUMERATION_EXTENSION, PHYSICAL_DEVICE_PROPERTIES2_EXTENSION]);
        let (names, _) = instance_extensions(&window, &available, false);
        assert_eq!(names.iter().filter(|name| *name == PHYSICAL_DEVICE_PROPERTIES2_EXTENSION).count(), 1);
    }
}

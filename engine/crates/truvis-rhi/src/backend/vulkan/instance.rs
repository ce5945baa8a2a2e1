use std::collections::HashSet;
use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;

use crate::backend::InstanceDesc;
use crate::backend::vulkan::debug_messenger::VulkanDebugMessenger;
use crate::error::{RhiError, RhiResult, log_err};
use crate::types::SurfaceHandle;

pub(crate) struct VulkanInstance {
    pub(crate) ash_instance: ash::Instance,
    /// 开启了 VK_EXT_debug_utils，可以使用 debug messenger、object name 和 label
    pub(crate) debug_utils_enabled: bool,
}

impl VulkanInstance {
    pub const VALIDATION_LAYER: &'static CStr = c"VK_LAYER_KHRONOS_validation";

    /// 检查 validation layer 是否安装
    pub fn validation_layers_available(vk_entry: &ash::Entry) -> bool {
        let Ok(all_layer_props) = (unsafe { vk_entry.enumerate_instance_layer_properties() }) else {
            return false;
        };
        all_layer_props
            .iter()
            .any(|layer| Self::VALIDATION_LAYER == unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
    }

    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(vk_entry: &ash::Entry, desc: &InstanceDesc) -> RhiResult<Self> {
        let loader_version = unsafe { vk_entry.try_enumerate_instance_version()? }.unwrap_or(vk::API_VERSION_1_0);
        if loader_version < vk::API_VERSION_1_3 {
            return Err(log_err(RhiError::Unsupported(format!(
                "vulkan loader version {}.{} is lower than 1.3",
                vk::api_version_major(loader_version),
                vk::api_version_minor(loader_version)
            ))));
        }

        let app_name = CString::new(desc.app_name.as_str())
            .map_err(|_| log_err(RhiError::invalid_parameter("app name contains a nul byte")))?;
        let engine_name = CString::new(desc.engine_name.as_str())
            .map_err(|_| log_err(RhiError::invalid_parameter("engine name contains a nul byte")))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let (enabled_extensions, debug_utils_enabled) = Self::get_extensions(vk_entry, desc)?;
        // 多行输出到一个字符串
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let enabled_layers = Self::get_layers(desc.enable_validation);
        let mut enabled_layers_str = String::new();
        for layer in &enabled_layers {
            enabled_layers_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*layer) }));
        }
        log::info!("instance layers: {}", enabled_layers_str);

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // 为 instance info 添加 debug messenger，用于捕获 instance 创建和销毁过程中的消息
        let mut debug_utils_messenger_ci = VulkanDebugMessenger::debug_utils_messenger_ci();
        if desc.enable_validation && debug_utils_enabled {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        let handle = unsafe { vk_entry.create_instance(&instance_ci, None)? };

        Ok(Self {
            ash_instance: handle,
            debug_utils_enabled,
        })
    }

    pub fn destroy(self) {
        log::info!("Destroying VulkanInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// 构造过程
impl VulkanInstance {
    /// instance 所需的所有 extension
    ///
    /// # return
    /// (instance 所需的且受支持的 extension, 是否开启了 debug utils)
    fn get_extensions(vk_entry: &ash::Entry, desc: &InstanceDesc) -> RhiResult<(Vec<*const c_char>, bool)> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None)? };
        for ext in &all_ext_props {
            log::debug!("Available extension: {:?}", unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) });
        }
        let is_supported = |ext: &CStr| {
            all_ext_props
                .iter()
                .any(|supported_ext| ext == unsafe { CStr::from_ptr(supported_ext.extension_name.as_ptr()) })
        };

        let mut enabled_extensions: HashSet<*const c_char> = HashSet::new();

        // 窗口系统要求的 extension 必须全部支持
        if let SurfaceHandle::Window { display, .. } = desc.surface {
            let surface_exts = ash_window::enumerate_required_extensions(display)?;
            for ext in surface_exts {
                let ext_name = unsafe { CStr::from_ptr(*ext) };
                if !is_supported(ext_name) {
                    return Err(log_err(RhiError::Unsupported(format!(
                        "Required instance extensions ({:?}) are missing",
                        ext_name
                    ))));
                }
                enabled_extensions.insert(*ext);
            }
        }

        // 这个 extension 可以单独使用，提供以下功能：
        // 1. debug messenger
        // 2. 为 vulkan object 设置 debug name
        // 3. 使用 label 标记 command buffer 中的一个一个 section
        let debug_utils_enabled = is_supported(vk::EXT_DEBUG_UTILS_NAME);
        if debug_utils_enabled {
            enabled_extensions.insert(vk::EXT_DEBUG_UTILS_NAME.as_ptr());
        } else {
            log::warn!("{:?} is not supported, debug names and labels are disabled", vk::EXT_DEBUG_UTILS_NAME);
        }

        Ok((enabled_extensions.into_iter().collect_vec(), debug_utils_enabled))
    }

    /// instance 所需的所有 layers，可用性已经由调用者检查过
    fn get_layers(enable_validation: bool) -> Vec<*const c_char> {
        let mut layers = Vec::new();
        if enable_validation {
            layers.push(Self::VALIDATION_LAYER.as_ptr());
        }
        layers
    }
}

/// 窗口对应的 vk surface，仅用于判断 queue family 是否支持 present
pub(crate) struct VulkanSurface {
    pub(crate) loader: ash::khr::surface::Instance,
    pub(crate) handle: vk::SurfaceKHR,
}

impl VulkanSurface {
    pub fn new(vk_entry: &ash::Entry, instance: &VulkanInstance, surface: &SurfaceHandle) -> RhiResult<Option<Self>> {
        let SurfaceHandle::Window { display, window } = *surface else {
            return Ok(None);
        };
        let loader = ash::khr::surface::Instance::new(vk_entry, &instance.ash_instance);
        let handle = unsafe { ash_window::create_surface(vk_entry, &instance.ash_instance, display, window, None)? };
        Ok(Some(Self { loader, handle }))
    }

    pub fn destroy(self) {
        log::info!("Destroying VulkanSurface");
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

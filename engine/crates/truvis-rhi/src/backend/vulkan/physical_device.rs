use std::ffi::CStr;

use ash::vk;

use crate::backend::vulkan::conversions;
use crate::backend::vulkan::instance::VulkanSurface;
use crate::error::RhiResult;
use crate::types::AdapterInfo;

pub(crate) struct VulkanPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,
    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    pub(crate) queue_family_props: Vec<vk::QueueFamilyProperties>,
    /// 同时支持 graphics 和 present 的 queue family 优先
    pub(crate) graphics_queue_family: Option<u32>,
    pub(crate) supports_present: bool,
    /// 满足 RHI 对 vulkan 1.3、dynamic rendering、sync2、push descriptor 的要求
    pub(crate) meets_requirements: bool,
}

impl VulkanPhysicalDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        surface: Option<&VulkanSurface>,
    ) -> RhiResult<Self> {
        unsafe {
            let basic_props = instance.get_physical_device_properties(pdevice);
            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);

            let mut graphics_queue_family = None;
            let mut supports_present = false;
            for (idx, props) in queue_family_props.iter().enumerate() {
                if !props.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    continue;
                }
                let present = match surface {
                    Some(surface) => surface.loader.get_physical_device_surface_support(
                        pdevice,
                        idx as u32,
                        surface.handle,
                    )?,
                    None => false,
                };
                if graphics_queue_family.is_none() || (present && !supports_present) {
                    graphics_queue_family = Some(idx as u32);
                    supports_present = present;
                }
            }

            let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
            instance.get_physical_device_features2(pdevice, &mut features2);
            let dynamic_rendering = features13.dynamic_rendering == vk::TRUE;
            let synchronization2 = features13.synchronization2 == vk::TRUE;

            let exts = instance.enumerate_device_extension_properties(pdevice)?;
            let push_descriptor = exts.iter().any(|ext| {
                ash::khr::push_descriptor::NAME == CStr::from_ptr(ext.extension_name.as_ptr())
            });

            let meets_requirements = basic_props.api_version >= vk::API_VERSION_1_3
                && dynamic_rendering
                && synchronization2
                && push_descriptor;

            Ok(Self {
                vk_handle: pdevice,
                basic_props,
                queue_family_props,
                graphics_queue_family,
                supports_present,
                meets_requirements,
            })
        }
    }
}

// getter
impl VulkanPhysicalDevice {
    #[inline]
    pub fn name(&self) -> String {
        self.basic_props.device_name_as_c_str().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
    }

    /// graphics queue family 上的 timestamp 是否可用
    #[inline]
    pub fn timestamp_valid(&self) -> bool {
        self.graphics_queue_family
            .and_then(|idx| self.queue_family_props.get(idx as usize))
            .is_some_and(|props| props.timestamp_valid_bits > 0)
    }

    /// 不满足要求的 adapter 报告为没有 graphics queue，从而不会被选中
    pub fn adapter_info(&self) -> AdapterInfo {
        let name = self.name();
        if !self.meets_requirements {
            log::warn!(
                "adapter {} (api {}) lacks vulkan 1.3 dynamic rendering, synchronization2 or push descriptor",
                name,
                conversions::version_string(self.basic_props.api_version)
            );
        }
        AdapterInfo {
            name,
            adapter_type: conversions::adapter_type(self.basic_props.device_type),
            vendor_id: self.basic_props.vendor_id,
            device_id: self.basic_props.device_id,
            graphics_queue_family: self.graphics_queue_family.filter(|_| self.meets_requirements),
            supports_present: self.supports_present,
            timestamp_period_ns: self.basic_props.limits.timestamp_period,
        }
    }
}

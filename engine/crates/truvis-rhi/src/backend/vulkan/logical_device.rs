use std::ffi::{CStr, CString};

use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::instance::VulkanInstance;
use crate::backend::vulkan::physical_device::VulkanPhysicalDevice;
use crate::error::{RhiError, RhiResult, log_err};
use crate::types::{MAX_CONSTANT_BUFFER_SLOTS, MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS};

/// push descriptor set 中各类资源的起始 binding
pub(crate) const VS_CONSTANT_BUFFER_BINDING: u32 = 0;
pub(crate) const PS_CONSTANT_BUFFER_BINDING: u32 = VS_CONSTANT_BUFFER_BINDING + MAX_CONSTANT_BUFFER_SLOTS;
pub(crate) const TEXTURE_BINDING: u32 = PS_CONSTANT_BUFFER_BINDING + MAX_CONSTANT_BUFFER_SLOTS;
pub(crate) const SAMPLER_BINDING: u32 = TEXTURE_BINDING + MAX_TEXTURE_SLOTS;

/// 一个 frame in flight 使用的命令资源
pub(crate) struct FrameContext {
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) fence: vk::Fence,
    /// 已经提交，复用之前需要等待 fence
    pub(crate) submitted: bool,
}

pub(crate) struct VulkanDevice {
    pub(crate) ash_device: ash::Device,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
    pub(crate) push_descriptor: ash::khr::push_descriptor::Device,
    /// 必须在 ash_device 之前销毁
    pub(crate) allocator: Option<vk_mem::Allocator>,

    pub(crate) queue: vk::Queue,
    pub(crate) queue_family_index: u32,

    command_pool: vk::CommandPool,
    frames: Vec<FrameContext>,
    frame_index: usize,
    recording: bool,

    pub(crate) query_pool: vk::QueryPool,
    pub(crate) query_capacity: u32,
    pub(crate) timestamp_period_ns: f32,
    pub(crate) timestamp_valid: bool,

    pub(crate) descriptor_set_layout: vk::DescriptorSetLayout,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) pipeline_cache: vk::PipelineCache,

    pub(crate) sampler_anisotropy: bool,
}

// init & destroy
impl VulkanDevice {
    pub fn new(
        instance: &VulkanInstance,
        pdevice: &VulkanPhysicalDevice,
        frames_in_flight: u32,
        max_queries: u32,
    ) -> RhiResult<Self> {
        let queue_family_index = pdevice
            .graphics_queue_family
            .ok_or_else(|| log_err(RhiError::not_initialized("selected adapter has no graphics queue family")))?;

        let device_exts = Self::basic_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        let mut exts_str = String::new();
        for ext in &device_exts {
            exts_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("device exts: {}", exts_str);

        let supported_features =
            unsafe { instance.ash_instance.get_physical_device_features(pdevice.vk_handle) };
        let sampler_anisotropy = supported_features.sampler_anisotropy == vk::TRUE;
        let basic_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(sampler_anisotropy);
        let mut features13 =
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true);
        let mut all_features =
            vk::PhysicalDeviceFeatures2::default().features(basic_features).push_next(&mut features13);

        let queue_priorities = [1.0];
        let queue_cis = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_cis)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let ash_device = unsafe { instance.ash_instance.create_device(pdevice.vk_handle, &device_ci, None)? };
        let queue = unsafe { ash_device.get_device_queue(queue_family_index, 0) };

        let debug_utils = instance
            .debug_utils_enabled
            .then(|| ash::ext::debug_utils::Device::new(&instance.ash_instance, &ash_device));
        let push_descriptor = ash::khr::push_descriptor::Device::new(&instance.ash_instance, &ash_device);

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&instance.ash_instance, &ash_device, pdevice.vk_handle);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = match unsafe { vk_mem::Allocator::new(vma_ci) } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { ash_device.destroy_device(None) };
                return Err(log_err(e.into()));
            }
        };

        let mut device = Self {
            ash_device,
            debug_utils,
            push_descriptor,
            allocator: Some(allocator),
            queue,
            queue_family_index,
            command_pool: vk::CommandPool::null(),
            frames: Vec::new(),
            frame_index: 0,
            recording: false,
            query_pool: vk::QueryPool::null(),
            query_capacity: max_queries,
            timestamp_period_ns: pdevice.basic_props.limits.timestamp_period,
            timestamp_valid: pdevice.timestamp_valid(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline_cache: vk::PipelineCache::null(),
            sampler_anisotropy,
        };

        // 之后的任何失败都由 destroy 统一清理已经创建的对象
        if let Err(e) = device.init_objects(frames_in_flight) {
            device.destroy();
            return Err(log_err(e));
        }
        Ok(device)
    }

    fn init_objects(&mut self, frames_in_flight: u32) -> RhiResult<()> {
        unsafe {
            let pool_ci = vk::CommandPoolCreateInfo::default()
                .queue_family_index(self.queue_family_index)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            self.command_pool = self.ash_device.create_command_pool(&pool_ci, None)?;
            self.set_debug_name(self.command_pool, "CommandPool::graphics");

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(frames_in_flight);
            let command_buffers = self.ash_device.allocate_command_buffers(&alloc_info)?;
            for (idx, command_buffer) in command_buffers.into_iter().enumerate() {
                let fence = self.ash_device.create_fence(&vk::FenceCreateInfo::default(), None)?;
                self.set_debug_name(command_buffer, &format!("CommandBuffer::frame-{}", idx));
                self.set_debug_name(fence, &format!("Fence::frame-{}", idx));
                self.frames.push(FrameContext {
                    command_buffer,
                    fence,
                    submitted: false,
                });
            }

            if self.query_capacity > 0 {
                let query_pool_ci = vk::QueryPoolCreateInfo::default()
                    .query_type(vk::QueryType::TIMESTAMP)
                    .query_count(self.query_capacity);
                self.query_pool = self.ash_device.create_query_pool(&query_pool_ci, None)?;
                self.set_debug_name(self.query_pool, "QueryPool::timestamp");
            }

            let layout_bindings = Self::descriptor_layout_bindings();
            let set_layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
                .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
                .bindings(&layout_bindings);
            self.descriptor_set_layout = self.ash_device.create_descriptor_set_layout(&set_layout_ci, None)?;

            let set_layouts = [self.descriptor_set_layout];
            let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
            self.pipeline_layout = self.ash_device.create_pipeline_layout(&pipeline_layout_ci, None)?;
            self.set_debug_name(self.pipeline_layout, "PipelineLayout::rhi");

            self.pipeline_cache =
                self.ash_device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)?;
        }
        Ok(())
    }

    /// 调用者需要先销毁所有由 device 创建的资源
    pub fn destroy(&mut self) {
        log::info!("Destroying VulkanDevice");
        unsafe {
            let _ = self.ash_device.device_wait_idle();

            if self.pipeline_cache != vk::PipelineCache::null() {
                self.ash_device.destroy_pipeline_cache(self.pipeline_cache, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                self.ash_device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                self.ash_device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            }
            if self.query_pool != vk::QueryPool::null() {
                self.ash_device.destroy_query_pool(self.query_pool, None);
            }
            for frame in self.frames.drain(..) {
                self.ash_device.destroy_fence(frame.fence, None);
            }
            if self.command_pool != vk::CommandPool::null() {
                self.ash_device.destroy_command_pool(self.command_pool, None);
            }

            // allocator 需要在 device 之前销毁
            self.allocator.take();
            self.ash_device.destroy_device(None);
        }
    }
}

// frame
impl VulkanDevice {
    /// 等待当前 frame 的命令资源可以复用，然后开始录制
    pub fn begin_frame(&mut self) -> RhiResult<()> {
        if self.recording {
            return Ok(());
        }
        let frame = &mut self.frames[self.frame_index];
        unsafe {
            if frame.submitted {
                self.ash_device.wait_for_fences(&[frame.fence], true, u64::MAX)?;
                self.ash_device.reset_fences(&[frame.fence])?;
                frame.submitted = false;
            }
            self.ash_device.reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.ash_device.begin_command_buffer(
                frame.command_buffer,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        self.recording = true;
        Ok(())
    }

    /// 结束录制并提交到 graphics queue
    pub fn end_frame(&mut self) -> RhiResult<()> {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;
        let frame = &mut self.frames[self.frame_index];
        unsafe {
            self.ash_device.end_command_buffer(frame.command_buffer)?;
            let command_buffer_infos =
                [vk::CommandBufferSubmitInfo::default().command_buffer(frame.command_buffer)];
            let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&command_buffer_infos);
            self.ash_device.queue_submit2(self.queue, &[submit_info], frame.fence)?;
        }
        frame.submitted = true;
        self.frame_index = (self.frame_index + 1) % self.frames.len();
        Ok(())
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.ash_device.device_wait_idle()? };
        Ok(())
    }

    /// 当前正在录制的 command buffer
    pub fn command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(log_err(RhiError::not_initialized("no frame is being recorded")));
        }
        Ok(self.frames[self.frame_index].command_buffer)
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

// getter
impl VulkanDevice {
    #[inline]
    pub fn allocator(&self) -> RhiResult<&vk_mem::Allocator> {
        self.allocator.as_ref().ok_or_else(|| RhiError::not_initialized("memory allocator was destroyed"))
    }
}

// tools
impl VulkanDevice {
    /// 没有开启 debug utils 时什么也不做
    pub fn set_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        unsafe {
            if let Err(e) = debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            ) {
                log::warn!("Failed to set debug name {:?}: {:?}", name, e);
            }
        }
    }

    pub fn begin_label(&self, command_buffer: vk::CommandBuffer, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(label_name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into());
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(command_buffer, &label);
        }
    }

    pub fn end_label(&self, command_buffer: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(command_buffer);
            }
        }
    }
}

// 创建过程的辅助函数
impl VulkanDevice {
    /// 必要的 device extensions
    fn basic_device_exts() -> Vec<&'static CStr> {
        vec![
            // 绑定资源时直接 push 到 command buffer，不需要 descriptor pool
            ash::khr::push_descriptor::NAME,
        ]
    }

    /// 与绑定表中 slot 一一对应的 push descriptor binding
    fn descriptor_layout_bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        let make = |first: u32, count: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags| {
            (first..first + count).map(move |binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(stages)
            })
        };
        make(
            VS_CONSTANT_BUFFER_BINDING,
            MAX_CONSTANT_BUFFER_SLOTS,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        )
        .chain(make(
            PS_CONSTANT_BUFFER_BINDING,
            MAX_CONSTANT_BUFFER_SLOTS,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        ))
        .chain(make(
            TEXTURE_BINDING,
            MAX_TEXTURE_SLOTS,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ShaderStageFlags::FRAGMENT,
        ))
        .chain(make(SAMPLER_BINDING, MAX_SAMPLER_SLOTS, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT))
        .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_bindings_are_contiguous() {
        let bindings = VulkanDevice::descriptor_layout_bindings();
        assert_eq!(bindings.len() as u32, SAMPLER_BINDING + MAX_SAMPLER_SLOTS);
        for (idx, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, idx as u32);
        }
        assert_eq!(bindings[PS_CONSTANT_BUFFER_BINDING as usize].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[TEXTURE_BINDING as usize].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
    }
}

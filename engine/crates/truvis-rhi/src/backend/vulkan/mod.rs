//! 基于 ash 的 vulkan 后端
//!
//! 所有原生对象（entry、instance、debug messenger、surface、device、allocator）都由
//! [`VulkanBackend`] 持有，按照创建的逆序销毁。

mod commands;
mod conversions;
mod debug_messenger;
mod instance;
mod logical_device;
mod physical_device;
mod pipeline;
mod query;
mod resources;

use std::collections::HashMap;

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;

use crate::backend::vulkan::debug_messenger::VulkanDebugMessenger;
use crate::backend::vulkan::instance::{VulkanInstance, VulkanSurface};
use crate::backend::vulkan::logical_device::VulkanDevice;
use crate::backend::vulkan::physical_device::VulkanPhysicalDevice;
use crate::backend::vulkan::pipeline::PipelineKey;
use crate::backend::vulkan::query::VulkanQuery;
use crate::backend::vulkan::resources::{VulkanBuffer, VulkanShaderModule, VulkanTexture};
use crate::backend::{Backend, BackendKind, InstanceDesc, MappedMemory};
use crate::device::{Binding, BindingTable, DrawCall};
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::{BufferHandle, QueryHandle, SamplerHandle, ShaderHandle, TextureHandle};
use crate::types::{
    AdapterInfo, BufferDesc, ClearFlags, Color, QueryResult, QueryType, SamplerDesc, ShaderStage, TextureDesc,
};

/// debug label 的颜色
const EVENT_LABEL_COLOR: glam::Vec4 = glam::Vec4::new(0.3, 0.6, 0.9, 1.0);

pub struct VulkanBackend {
    /// 在第一次需要时加载 vulkan loader
    vk_entry: Option<ash::Entry>,
    instance: Option<VulkanInstance>,
    debug_messenger: Option<VulkanDebugMessenger>,
    surface: Option<VulkanSurface>,
    physical_devices: Vec<VulkanPhysicalDevice>,
    selected_adapter: Option<usize>,
    device: Option<VulkanDevice>,
    instance_desc: Option<InstanceDesc>,

    buffers: SlotMap<BufferHandle, VulkanBuffer>,
    shaders: SlotMap<ShaderHandle, VulkanShaderModule>,
    textures: SlotMap<TextureHandle, VulkanTexture>,
    samplers: SlotMap<SamplerHandle, vk::Sampler>,
    queries: SlotMap<QueryHandle, VulkanQuery>,
    free_query_slots: Vec<u32>,
    pipelines: HashMap<PipelineKey, vk::Pipeline>,

    /// 已经提交到 queue 的帧数
    submitted_frames: u64,
}

impl Default for VulkanBackend {
    fn default() -> Self {
        Self::new()
    }
}

// init & destroy
impl VulkanBackend {
    pub fn new() -> Self {
        Self {
            vk_entry: None,
            instance: None,
            debug_messenger: None,
            surface: None,
            physical_devices: Vec::new(),
            selected_adapter: None,
            device: None,
            instance_desc: None,
            buffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            queries: SlotMap::with_key(),
            free_query_slots: Vec::new(),
            pipelines: HashMap::new(),
            submitted_frames: 0,
        }
    }

    fn entry(&mut self) -> RhiResult<&ash::Entry> {
        if self.vk_entry.is_none() {
            let entry = unsafe { ash::Entry::load() }
                .map_err(|e| log_err(RhiError::backend(format!("failed to load the vulkan loader: {}", e))))?;
            self.vk_entry = Some(entry);
        }
        self.vk_entry.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan entry"))
    }

    fn instance(&self) -> RhiResult<&VulkanInstance> {
        self.instance.as_ref().ok_or_else(|| log_err(RhiError::not_initialized("vulkan instance")))
    }

    fn device(&self) -> RhiResult<&VulkanDevice> {
        self.device.as_ref().ok_or_else(|| log_err(RhiError::not_initialized("vulkan device")))
    }

    /// 释放 device 创建的所有资源，device 本身保留
    fn release_resources(&mut self) {
        let Some(device) = &self.device else {
            return;
        };
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                device.ash_device.destroy_pipeline(pipeline, None);
            }
            for (_, sampler) in self.samplers.drain() {
                device.ash_device.destroy_sampler(sampler, None);
            }
            for (_, module) in self.shaders.drain() {
                device.ash_device.destroy_shader_module(module.handle, None);
            }
        }
        for (_, texture) in self.textures.drain() {
            device.destroy_texture(texture);
        }
        for (_, buffer) in self.buffers.drain() {
            device.destroy_buffer(buffer);
        }
        self.queries.clear();
        self.free_query_slots.clear();
    }
}

impl Backend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    /// 选中 adapter 之前返回 RHI 要求的最低版本
    fn api_version(&self) -> String {
        let version = self
            .selected_adapter
            .and_then(|idx| self.physical_devices.get(idx))
            .map_or(vk::API_VERSION_1_3, |pdevice| pdevice.basic_props.api_version);
        conversions::version_string(version)
    }

    fn validation_layers_available(&mut self) -> bool {
        match self.entry() {
            Ok(entry) => VulkanInstance::validation_layers_available(entry),
            Err(_) => false,
        }
    }

    fn create_instance(&mut self, desc: &InstanceDesc) -> RhiResult<()> {
        let entry = self.entry()?.clone();
        let instance = VulkanInstance::new(&entry, desc)?;
        let surface = match VulkanSurface::new(&entry, &instance, &desc.surface) {
            Ok(surface) => surface,
            Err(e) => {
                instance.destroy();
                return Err(log_err(e));
            }
        };
        self.instance = Some(instance);
        self.surface = surface;
        self.instance_desc = Some(desc.clone());
        Ok(())
    }

    fn install_debug_messenger(&mut self) -> RhiResult<()> {
        let entry = self.entry()?.clone();
        let instance = self.instance()?;
        if !instance.debug_utils_enabled {
            return Err(RhiError::Unsupported(format!("{:?} is not enabled", vk::EXT_DEBUG_UTILS_NAME)));
        }
        let messenger = VulkanDebugMessenger::new(&entry, &instance.ash_instance)?;
        self.debug_messenger = Some(messenger);
        Ok(())
    }

    fn enumerate_adapters(&mut self) -> RhiResult<Vec<AdapterInfo>> {
        let instance = self.instance()?;
        let pdevices = unsafe { instance.ash_instance.enumerate_physical_devices()? };
        let physical_devices = pdevices
            .into_iter()
            .map(|pdevice| VulkanPhysicalDevice::new(&instance.ash_instance, pdevice, self.surface.as_ref()))
            .collect::<RhiResult<Vec<_>>>()?;

        let adapters = physical_devices.iter().map(VulkanPhysicalDevice::adapter_info).collect();
        self.physical_devices = physical_devices;
        Ok(adapters)
    }

    fn create_device(&mut self, adapter_index: usize) -> RhiResult<()> {
        let (frames_in_flight, max_queries) = self
            .instance_desc
            .as_ref()
            .map(|desc| (desc.frames_in_flight.max(1), desc.max_queries))
            .ok_or_else(|| RhiError::not_initialized("vulkan instance"))?;
        let instance = self.instance()?;
        let pdevice = self
            .physical_devices
            .get(adapter_index)
            .ok_or_else(|| log_err(RhiError::invalid_parameter(format!("no adapter at index {}", adapter_index))))?;

        let device = VulkanDevice::new(instance, pdevice, frames_in_flight, max_queries)?;
        log::info!("vulkan device created on {}", pdevice.name());

        self.free_query_slots = (0..max_queries).rev().collect();
        self.selected_adapter = Some(adapter_index);
        self.device = Some(device);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(device) = &self.device {
            if let Err(e) = device.wait_idle() {
                log::error!("Failed to wait device idle before shutdown: {}", e);
            }
        }
        self.release_resources();
        if let Some(mut device) = self.device.take() {
            device.destroy();
        }
        self.physical_devices.clear();
        self.selected_adapter = None;
        if let Some(surface) = self.surface.take() {
            surface.destroy();
        }
        // debug messenger 必须在 instance 之前销毁
        self.debug_messenger.take();
        if let Some(instance) = self.instance.take() {
            instance.destroy();
        }
        self.instance_desc = None;
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device()?.wait_idle()
    }

    fn begin_frame(&mut self) -> RhiResult<()> {
        self.device.as_mut().ok_or_else(|| RhiError::not_initialized("vulkan device"))?.begin_frame()
    }

    fn end_frame(&mut self) -> RhiResult<()> {
        let device = self.device.as_mut().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let was_recording = device.is_recording();
        device.end_frame()?;
        if was_recording {
            self.submitted_frames += 1;
        }
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDesc, name: &str) -> RhiResult<BufferHandle> {
        let buffer = self.device()?.create_buffer(desc, name)?;
        Ok(self.buffers.insert(buffer))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let (Some(device), Some(buffer)) = (&self.device, self.buffers.remove(buffer)) {
            device.destroy_buffer(buffer);
        }
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> RhiResult<MappedMemory> {
        let device = self.device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let buffer = self.buffers.get_mut(buffer).ok_or_else(|| RhiError::not_initialized("buffer"))?;
        device.map_buffer(buffer)
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> RhiResult<()> {
        let device = self.device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let buffer = self.buffers.get_mut(buffer).ok_or_else(|| RhiError::not_initialized("buffer"))?;
        device.unmap_buffer(buffer)
    }

    fn create_shader_module(&mut self, stage: ShaderStage, spirv: &[u32], name: &str) -> RhiResult<ShaderHandle> {
        let module = self.device()?.create_shader_module(stage, spirv, name)?;
        Ok(self.shaders.insert(module))
    }

    fn destroy_shader_module(&mut self, module: ShaderHandle) {
        let Some(device) = &self.device else {
            return;
        };
        // 使用了这个 module 的 pipeline 一起销毁
        let stale_keys = self.pipelines.keys().filter(|key| key.uses_shader(module)).cloned().collect_vec();
        for key in stale_keys {
            if let Some(pipeline) = self.pipelines.remove(&key) {
                unsafe { device.ash_device.destroy_pipeline(pipeline, None) };
            }
        }
        if let Some(shader) = self.shaders.remove(module) {
            log::debug!("destroying {:?} shader module", shader.stage);
            unsafe { device.ash_device.destroy_shader_module(shader.handle, None) };
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc, name: &str) -> RhiResult<TextureHandle> {
        let texture = self.device()?.create_texture(desc, name)?;
        Ok(self.textures.insert(texture))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let (Some(device), Some(texture)) = (&self.device, self.textures.remove(texture)) {
            device.destroy_texture(texture);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc, name: &str) -> RhiResult<SamplerHandle> {
        let sampler = self.device()?.create_sampler(desc, name)?;
        Ok(self.samplers.insert(sampler))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let (Some(device), Some(sampler)) = (&self.device, self.samplers.remove(sampler)) {
            unsafe { device.ash_device.destroy_sampler(sampler, None) };
        }
    }

    /// 状态在 draw 时从绑定表整体读取，这里只做检查
    fn bind_resource(&mut self, binding: &Binding) -> RhiResult<()> {
        self.device()?;
        log::trace!("bind {}", binding.name());
        Ok(())
    }

    fn submit_draw(&mut self, draw: &DrawCall, bindings: &BindingTable) -> RhiResult<()> {
        self.record_draw(draw, bindings)
    }

    fn clear_render_target(&mut self, target: TextureHandle, color: Color) -> RhiResult<()> {
        self.record_clear_color(target, color)
    }

    fn clear_depth_stencil(
        &mut self,
        target: TextureHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u32,
    ) -> RhiResult<()> {
        self.record_clear_depth_stencil(target, flags, depth, stencil)
    }

    fn begin_event(&mut self, name: &str) {
        if let Some(device) = &self.device {
            if let Ok(command_buffer) = device.command_buffer() {
                device.begin_label(command_buffer, name, EVENT_LABEL_COLOR);
            }
        }
    }

    fn end_event(&mut self) {
        if let Some(device) = &self.device {
            if let Ok(command_buffer) = device.command_buffer() {
                device.end_label(command_buffer);
            }
        }
    }

    fn create_query(&mut self, ty: QueryType) -> RhiResult<QueryHandle> {
        self.device()?;
        self.alloc_query(ty)
    }

    fn destroy_query(&mut self, query: QueryHandle) {
        self.free_query(query);
    }

    fn begin_query(&mut self, query: QueryHandle) -> RhiResult<()> {
        self.begin_disjoint(query)
    }

    fn end_query(&mut self, query: QueryHandle) -> RhiResult<()> {
        self.end_disjoint(query)
    }

    fn write_timestamp(&mut self, query: QueryHandle) -> RhiResult<()> {
        self.record_timestamp(query)
    }

    fn resolve_query(&mut self, query: QueryHandle) -> RhiResult<Option<QueryResult>> {
        self.poll_query(query)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

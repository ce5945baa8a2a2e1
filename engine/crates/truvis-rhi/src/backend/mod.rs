//! 图形 API 后端
//!
//! [`Device`](crate::device::Device) 负责参数检查、绑定表以及状态机，
//! 后端只负责把命令翻译成原生 API 调用。

pub mod headless;
#[cfg(feature = "vulkan")]
pub mod vulkan;

use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::device::{Binding, BindingTable, DrawCall};
use crate::error::RhiResult;
use crate::handles::{BufferHandle, QueryHandle, SamplerHandle, ShaderHandle, TextureHandle};
use crate::types::{
    AdapterInfo, BufferDesc, ClearFlags, Color, QueryResult, QueryType, SamplerDesc, ShaderStage, SurfaceHandle,
    TextureDesc,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[cfg_attr(feature = "vulkan", default)]
    Vulkan,
    #[cfg_attr(not(feature = "vulkan"), default)]
    Headless,
}

/// 创建 instance 所需的参数
#[derive(Clone, Debug)]
pub struct InstanceDesc {
    pub app_name: String,
    pub engine_name: String,
    /// 已经确认 validation layer 可用
    pub enable_validation: bool,
    pub surface: SurfaceHandle,
    pub frames_in_flight: u32,
    pub max_queries: u32,
}

/// map 得到的 CPU 可见内存
///
/// 指针在对应的 unmap 之前一直有效
#[derive(Clone, Copy, Debug)]
pub struct MappedMemory {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

/// 后端需要实现的能力集合
///
/// 初始化按照 create_instance -> install_debug_messenger -> enumerate_adapters -> create_device
/// 的顺序调用；shutdown 之后不会再有任何调用。
pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// 图形 API 的版本号，初始化成功后写入 settings
    fn api_version(&self) -> String;

    // init & destroy
    fn validation_layers_available(&mut self) -> bool;
    fn create_instance(&mut self, desc: &InstanceDesc) -> RhiResult<()>;
    fn install_debug_messenger(&mut self) -> RhiResult<()>;
    fn enumerate_adapters(&mut self) -> RhiResult<Vec<AdapterInfo>>;
    fn create_device(&mut self, adapter_index: usize) -> RhiResult<()>;
    /// 按照创建的逆序释放所有原生对象，可以重复调用
    fn shutdown(&mut self);

    // frame
    fn wait_idle(&mut self) -> RhiResult<()>;
    fn begin_frame(&mut self) -> RhiResult<()>;
    fn end_frame(&mut self) -> RhiResult<()>;

    // resources
    fn create_buffer(&mut self, desc: &BufferDesc, name: &str) -> RhiResult<BufferHandle>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn map_buffer(&mut self, buffer: BufferHandle) -> RhiResult<MappedMemory>;
    fn unmap_buffer(&mut self, buffer: BufferHandle) -> RhiResult<()>;
    fn create_shader_module(&mut self, stage: ShaderStage, spirv: &[u32], name: &str) -> RhiResult<ShaderHandle>;
    fn destroy_shader_module(&mut self, module: ShaderHandle);
    fn create_texture(&mut self, desc: &TextureDesc, name: &str) -> RhiResult<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn create_sampler(&mut self, desc: &SamplerDesc, name: &str) -> RhiResult<SamplerHandle>;
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // commands
    /// 绑定表发生变化时调用
    fn bind_resource(&mut self, binding: &Binding) -> RhiResult<()>;
    fn submit_draw(&mut self, draw: &DrawCall, bindings: &BindingTable) -> RhiResult<()>;
    fn clear_render_target(&mut self, target: TextureHandle, color: Color) -> RhiResult<()>;
    fn clear_depth_stencil(&mut self, target: TextureHandle, flags: ClearFlags, depth: f32, stencil: u32)
    -> RhiResult<()>;
    fn begin_event(&mut self, name: &str);
    fn end_event(&mut self);

    // profiling
    fn create_query(&mut self, ty: QueryType) -> RhiResult<QueryHandle>;
    fn destroy_query(&mut self, query: QueryHandle);
    fn begin_query(&mut self, query: QueryHandle) -> RhiResult<()>;
    fn end_query(&mut self, query: QueryHandle) -> RhiResult<()>;
    fn write_timestamp(&mut self, query: QueryHandle) -> RhiResult<()>;
    /// 结果还没有就绪时返回 None，不会阻塞
    fn resolve_query(&mut self, query: QueryHandle) -> RhiResult<Option<QueryResult>>;
}

/// 根据配置创建后端
pub fn create_backend(kind: BackendKind) -> RhiResult<Box<dyn Backend>> {
    match kind {
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan => Ok(Box::new(vulkan::VulkanBackend::new())),
        #[cfg(not(feature = "vulkan"))]
        BackendKind::Vulkan => Err(crate::error::RhiError::Unsupported(
            "the vulkan backend is not compiled in, enable the `vulkan` feature".to_string(),
        )),
        BackendKind::Headless => Ok(Box::new(headless::HeadlessBackend::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_headless_backend() {
        let backend = create_backend(BackendKind::Headless).unwrap();
        assert_eq!(backend.kind(), BackendKind::Headless);
    }
}

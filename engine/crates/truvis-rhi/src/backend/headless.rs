//! 纯 CPU 的参考后端
//!
//! buffer 是普通的内存，命令只被记录下来。没有 GPU 的环境下用于测试以及离线工具。

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Instant;

use slotmap::SlotMap;

use crate::backend::{Backend, BackendKind, InstanceDesc, MappedMemory};
use crate::device::{Binding, BindingTable, DrawCall};
use crate::error::{RhiError, RhiResult};
use crate::handles::{BufferHandle, QueryHandle, SamplerHandle, ShaderHandle, TextureHandle};
use crate::types::{
    AdapterInfo, AdapterType, BufferDesc, ClearFlags, Color, QueryResult, QueryType, SamplerDesc, ShaderStage,
    TextureDesc,
};

/// 可以配置的后端行为，测试用它模拟各种环境
#[derive(Clone, Debug)]
pub struct HeadlessBackendDesc {
    pub adapters: Vec<AdapterInfo>,
    pub validation_layers_available: bool,
    pub fail_instance_creation: bool,
    pub fail_debug_messenger: bool,
    /// 提交帧总是失败
    pub fail_end_frame: bool,
    /// 前 N 次 bind_resource 失败
    pub fail_binds: u32,
    /// 所有 disjoint query 都报告时钟跳变
    pub force_disjoint: bool,
}

impl HeadlessBackendDesc {
    pub fn default_adapter() -> AdapterInfo {
        AdapterInfo {
            name: "Truvis Headless Adapter".to_string(),
            adapter_type: AdapterType::Cpu,
            vendor_id: 0,
            device_id: 0,
            graphics_queue_family: Some(0),
            supports_present: true,
            timestamp_period_ns: 1.0,
        }
    }
}

impl Default for HeadlessBackendDesc {
    fn default() -> Self {
        Self {
            adapters: vec![Self::default_adapter()],
            validation_layers_available: true,
            fail_instance_creation: false,
            fail_debug_messenger: false,
            fail_end_frame: false,
            fail_binds: 0,
            force_disjoint: false,
        }
    }
}

/// 后端收到的调用
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    CreateInstance { validation: bool },
    InstallDebugMessenger,
    EnumerateAdapters,
    CreateDevice { adapter_index: usize },
    Shutdown,
    WaitIdle,
    BeginFrame,
    EndFrame,
    CreateBuffer(BufferDesc),
    DestroyBuffer,
    MapBuffer,
    UnmapBuffer,
    CreateShaderModule(ShaderStage),
    DestroyShaderModule,
    CreateTexture(TextureDesc),
    DestroyTexture,
    CreateSampler,
    DestroySampler,
    Bind(Binding),
    Draw(DrawCall),
    ClearRenderTarget([f32; 4]),
    ClearDepthStencil { flags: ClearFlags, depth: f32, stencil: u32 },
    BeginEvent(String),
    EndEvent,
    CreateQuery(QueryType),
    DestroyQuery,
    BeginQuery,
    EndQuery,
    WriteTimestamp,
}

/// 与后端共享的命令记录，后端被 Device 持有之后仍然可以观察
#[derive(Clone, Debug, Default)]
pub struct CommandRecorder {
    commands: Rc<RefCell<Vec<RecordedCommand>>>,
}

impl CommandRecorder {
    #[inline]
    fn push(&self, command: RecordedCommand) {
        self.commands.borrow_mut().push(command);
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.borrow().clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.borrow().is_empty()
    }

    pub fn count(&self, pred: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.commands.borrow().iter().filter(|c| pred(c)).count()
    }

    #[inline]
    pub fn contains(&self, command: &RecordedCommand) -> bool {
        self.commands.borrow().contains(command)
    }

    #[inline]
    pub fn clear(&self) {
        self.commands.borrow_mut().clear();
    }
}

struct HeadlessBuffer {
    data: Vec<u8>,
    mapped: bool,
}

struct HeadlessQuery {
    ty: QueryType,
    /// disjoint query 是否处于 begin 和 end 之间
    active: bool,
    /// (时间戳, 写入时的帧号)
    timestamp: Option<(u64, u64)>,
    /// disjoint query 结束时的帧号
    ended_frame: Option<u64>,
}

pub struct HeadlessBackend {
    desc: HeadlessBackendDesc,
    recorder: CommandRecorder,

    instance_created: bool,
    device_created: bool,

    /// 已经结束的帧数
    frame_index: u64,
    frame_open: bool,
    epoch: Instant,

    buffers: SlotMap<BufferHandle, HeadlessBuffer>,
    shaders: SlotMap<ShaderHandle, ShaderStage>,
    textures: SlotMap<TextureHandle, TextureDesc>,
    samplers: SlotMap<SamplerHandle, SamplerDesc>,
    queries: SlotMap<QueryHandle, HeadlessQuery>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessBackendDesc::default())
    }
}

impl HeadlessBackend {
    pub fn new(desc: HeadlessBackendDesc) -> Self {
        Self {
            desc,
            recorder: CommandRecorder::default(),
            instance_created: false,
            device_created: false,
            frame_index: 0,
            frame_open: false,
            epoch: Instant::now(),
            buffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            queries: SlotMap::with_key(),
        }
    }

    #[inline]
    pub fn recorder(&self) -> CommandRecorder {
        self.recorder.clone()
    }

    #[inline]
    fn require_device(&self) -> RhiResult<()> {
        if self.device_created {
            Ok(())
        } else {
            Err(RhiError::not_initialized("headless device has not been created"))
        }
    }

    fn query_mut(&mut self, query: QueryHandle) -> RhiResult<&mut HeadlessQuery> {
        self.queries.get_mut(query).ok_or_else(|| RhiError::invalid_parameter("unknown query handle"))
    }

    /// 单调递增的纳秒时间戳，period 为 1ns
    #[inline]
    fn now_ticks(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Backend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn api_version(&self) -> String {
        "headless 1.0".to_string()
    }

    fn validation_layers_available(&mut self) -> bool {
        self.desc.validation_layers_available
    }

    fn create_instance(&mut self, desc: &InstanceDesc) -> RhiResult<()> {
        self.recorder.push(RecordedCommand::CreateInstance {
            validation: desc.enable_validation,
        });
        if self.desc.fail_instance_creation {
            return Err(RhiError::backend("headless instance creation was configured to fail"));
        }
        self.instance_created = true;
        Ok(())
    }

    fn install_debug_messenger(&mut self) -> RhiResult<()> {
        self.recorder.push(RecordedCommand::InstallDebugMessenger);
        if self.desc.fail_debug_messenger {
            return Err(RhiError::backend("headless debug messenger was configured to fail"));
        }
        Ok(())
    }

    fn enumerate_adapters(&mut self) -> RhiResult<Vec<AdapterInfo>> {
        self.recorder.push(RecordedCommand::EnumerateAdapters);
        if !self.instance_created {
            return Err(RhiError::not_initialized("headless instance has not been created"));
        }
        Ok(self.desc.adapters.clone())
    }

    fn create_device(&mut self, adapter_index: usize) -> RhiResult<()> {
        self.recorder.push(RecordedCommand::CreateDevice { adapter_index });
        if adapter_index >= self.desc.adapters.len() {
            return Err(RhiError::invalid_parameter(format!("adapter index {} out of range", adapter_index)));
        }
        self.device_created = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.instance_created {
            return;
        }
        self.recorder.push(RecordedCommand::Shutdown);

        self.queries.clear();
        self.samplers.clear();
        self.textures.clear();
        self.shaders.clear();
        self.buffers.clear();

        self.frame_open = false;
        self.device_created = false;
        self.instance_created = false;
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::WaitIdle);
        Ok(())
    }

    fn begin_frame(&mut self) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::BeginFrame);
        self.frame_open = true;
        Ok(())
    }

    fn end_frame(&mut self) -> RhiResult<()> {
        self.require_device()?;
        if !self.frame_open {
            return Err(RhiError::invalid_parameter("end_frame without begin_frame"));
        }
        if self.desc.fail_end_frame {
            self.frame_open = false;
            return Err(RhiError::backend("headless end_frame failure"));
        }
        self.recorder.push(RecordedCommand::EndFrame);
        self.frame_open = false;
        self.frame_index += 1;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDesc, _name: &str) -> RhiResult<BufferHandle> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::CreateBuffer(*desc));
        if desc.size == 0 {
            return Err(RhiError::invalid_parameter("buffer size is zero"));
        }
        Ok(self.buffers.insert(HeadlessBuffer {
            data: vec![0; desc.size as usize],
            mapped: false,
        }))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.recorder.push(RecordedCommand::DestroyBuffer);
        self.buffers.remove(buffer);
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> RhiResult<MappedMemory> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::MapBuffer);
        let buffer = self.buffers.get_mut(buffer).ok_or_else(|| RhiError::not_initialized("unknown buffer handle"))?;
        if buffer.mapped {
            return Err(RhiError::AlreadyMapped("headless buffer".to_string()));
        }
        let ptr = NonNull::new(buffer.data.as_mut_ptr()).ok_or_else(|| RhiError::backend("empty headless buffer"))?;
        buffer.mapped = true;
        Ok(MappedMemory {
            ptr,
            len: buffer.data.len(),
        })
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::UnmapBuffer);
        let buffer = self.buffers.get_mut(buffer).ok_or_else(|| RhiError::not_initialized("unknown buffer handle"))?;
        if !buffer.mapped {
            return Err(RhiError::invalid_parameter("unmap of a buffer that is not mapped"));
        }
        buffer.mapped = false;
        Ok(())
    }

    fn create_shader_module(&mut self, stage: ShaderStage, spirv: &[u32], _name: &str) -> RhiResult<ShaderHandle> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::CreateShaderModule(stage));
        // SPIR-V magic number
        if spirv.first() != Some(&0x0723_0203) {
            return Err(RhiError::invalid_parameter("shader code is not SPIR-V"));
        }
        Ok(self.shaders.insert(stage))
    }

    fn destroy_shader_module(&mut self, module: ShaderHandle) {
        self.recorder.push(RecordedCommand::DestroyShaderModule);
        self.shaders.remove(module);
    }

    fn create_texture(&mut self, desc: &TextureDesc, _name: &str) -> RhiResult<TextureHandle> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::CreateTexture(*desc));
        Ok(self.textures.insert(*desc))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.recorder.push(RecordedCommand::DestroyTexture);
        self.textures.remove(texture);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc, _name: &str) -> RhiResult<SamplerHandle> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::CreateSampler);
        Ok(self.samplers.insert(*desc))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.recorder.push(RecordedCommand::DestroySampler);
        self.samplers.remove(sampler);
    }

    fn bind_resource(&mut self, binding: &Binding) -> RhiResult<()> {
        self.require_device()?;
        if self.desc.fail_binds > 0 {
            self.desc.fail_binds -= 1;
            return Err(RhiError::backend(format!("headless {} bind failure", binding.name())));
        }
        self.recorder.push(RecordedCommand::Bind(binding.clone()));
        Ok(())
    }

    fn submit_draw(&mut self, draw: &DrawCall, _bindings: &BindingTable) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::Draw(*draw));
        Ok(())
    }

    fn clear_render_target(&mut self, target: TextureHandle, color: Color) -> RhiResult<()> {
        self.require_device()?;
        if !self.textures.contains_key(target) {
            return Err(RhiError::not_initialized("unknown render target"));
        }
        self.recorder.push(RecordedCommand::ClearRenderTarget(color.to_array()));
        Ok(())
    }

    fn clear_depth_stencil(
        &mut self,
        target: TextureHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u32,
    ) -> RhiResult<()> {
        self.require_device()?;
        if !self.textures.contains_key(target) {
            return Err(RhiError::not_initialized("unknown depth stencil target"));
        }
        self.recorder.push(RecordedCommand::ClearDepthStencil { flags, depth, stencil });
        Ok(())
    }

    fn begin_event(&mut self, name: &str) {
        self.recorder.push(RecordedCommand::BeginEvent(name.to_string()));
    }

    fn end_event(&mut self) {
        self.recorder.push(RecordedCommand::EndEvent);
    }

    fn create_query(&mut self, ty: QueryType) -> RhiResult<QueryHandle> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::CreateQuery(ty));
        Ok(self.queries.insert(HeadlessQuery {
            ty,
            active: false,
            timestamp: None,
            ended_frame: None,
        }))
    }

    fn destroy_query(&mut self, query: QueryHandle) {
        self.recorder.push(RecordedCommand::DestroyQuery);
        self.queries.remove(query);
    }

    fn begin_query(&mut self, query: QueryHandle) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::BeginQuery);
        let query = self.query_mut(query)?;
        query.active = true;
        query.ended_frame = None;
        Ok(())
    }

    fn end_query(&mut self, query: QueryHandle) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::EndQuery);
        let frame_index = self.frame_index;
        let query = self.query_mut(query)?;
        if !query.active {
            return Err(RhiError::invalid_parameter("end of a query that was never started"));
        }
        query.active = false;
        query.ended_frame = Some(frame_index);
        Ok(())
    }

    fn write_timestamp(&mut self, query: QueryHandle) -> RhiResult<()> {
        self.require_device()?;
        self.recorder.push(RecordedCommand::WriteTimestamp);
        let ticks = self.now_ticks();
        let frame_index = self.frame_index;
        self.query_mut(query)?.timestamp = Some((ticks, frame_index));
        Ok(())
    }

    fn resolve_query(&mut self, query: QueryHandle) -> RhiResult<Option<QueryResult>> {
        self.require_device()?;
        let frame_index = self.frame_index;
        let force_disjoint = self.desc.force_disjoint;
        let query = self.query_mut(query)?;

        // 所在的帧提交之后结果才可用
        let result = match query.ty {
            QueryType::Timestamp => query
                .timestamp
                .filter(|(_, frame)| *frame < frame_index)
                .map(|(ticks, _)| QueryResult::Timestamp(ticks)),
            QueryType::TimestampDisjoint => query.ended_frame.filter(|frame| *frame < frame_index).map(|_| {
                QueryResult::Disjoint {
                    period_ns: 1.0,
                    disjoint: force_disjoint,
                }
            }),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferKind, BufferUsage, SurfaceHandle};

    fn ready_backend() -> HeadlessBackend {
        let mut backend = HeadlessBackend::default();
        backend
            .create_instance(&InstanceDesc {
                app_name: "test".to_string(),
                engine_name: "test".to_string(),
                enable_validation: false,
                surface: SurfaceHandle::Headless,
                frames_in_flight: 2,
                max_queries: 8,
            })
            .unwrap();
        backend.create_device(0).unwrap();
        backend
    }

    #[test]
    fn test_map_is_exclusive() {
        let mut backend = ready_backend();
        let buffer = backend
            .create_buffer(
                &BufferDesc {
                    size: 16,
                    stride: 16,
                    kind: BufferKind::Constant,
                    usage: BufferUsage::Dynamic,
                },
                "cb",
            )
            .unwrap();
        let mapped = backend.map_buffer(buffer).unwrap();
        assert_eq!(mapped.len, 16);
        assert!(matches!(backend.map_buffer(buffer), Err(RhiError::AlreadyMapped(_))));
        backend.unmap_buffer(buffer).unwrap();
        assert!(backend.unmap_buffer(buffer).is_err());
    }

    #[test]
    fn test_timestamp_resolves_after_frame_end() {
        let mut backend = ready_backend();
        let query = backend.create_query(QueryType::Timestamp).unwrap();
        backend.begin_frame().unwrap();
        backend.write_timestamp(query).unwrap();
        assert_eq!(backend.resolve_query(query).unwrap(), None);
        backend.end_frame().unwrap();
        assert!(matches!(backend.resolve_query(query).unwrap(), Some(QueryResult::Timestamp(_))));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut backend = ready_backend();
        let recorder = backend.recorder();
        backend.shutdown();
        backend.shutdown();
        assert_eq!(recorder.count(|c| *c == RecordedCommand::Shutdown), 1);
        assert!(backend.begin_frame().is_err());
    }
}

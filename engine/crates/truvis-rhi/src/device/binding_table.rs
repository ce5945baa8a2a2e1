use crate::handles::{BufferHandle, SamplerHandle, ShaderHandle, TextureHandle};
use crate::object::ObjectId;
use crate::pipeline_state::{BlendDesc, DepthStencilDesc, RasterizerDesc};
use crate::types::{
    BufferScope, Format, IndexFormat, MAX_CONSTANT_BUFFER_SLOTS, MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS,
    PrimitiveTopology, Rectangle, ShaderStage, Viewport,
};
use crate::vertex::InputLayoutDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundBuffer {
    pub id: ObjectId,
    pub handle: BufferHandle,
    pub stride: u32,
    pub count: u32,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundShader {
    pub id: ObjectId,
    pub stage: ShaderStage,
    pub module: Option<ShaderHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundTexture {
    pub id: ObjectId,
    pub handle: TextureHandle,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundSampler {
    pub id: ObjectId,
    pub handle: SamplerHandle,
}

/// 管线状态对象在绑定表中的快照
#[derive(Clone, Debug, PartialEq)]
pub struct BoundState<D> {
    pub id: ObjectId,
    pub desc: D,
}

/// 一次 Set* 调用对绑定表的修改
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    VertexBuffer(BoundBuffer),
    IndexBuffer(BoundBuffer, IndexFormat),
    VertexShader(BoundShader),
    PixelShader(BoundShader),
    ConstantBuffers {
        start_slot: u32,
        buffers: Vec<BoundBuffer>,
        scope: BufferScope,
    },
    Samplers {
        start_slot: u32,
        samplers: Vec<BoundSampler>,
    },
    Textures {
        start_slot: u32,
        textures: Vec<BoundTexture>,
    },
    RenderTargets {
        targets: Vec<BoundTexture>,
        depth_stencil: Option<BoundTexture>,
    },
    Viewport(Viewport),
    ScissorRectangle(Rectangle),
    DepthStencilState(BoundState<DepthStencilDesc>),
    BlendState(BoundState<BlendDesc>),
    RasterizerState(BoundState<RasterizerDesc>),
    InputLayout(BoundState<InputLayoutDesc>),
    PrimitiveTopology(PrimitiveTopology),
}

impl Binding {
    /// 用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Binding::VertexBuffer(_) => "vertex buffer",
            Binding::IndexBuffer(..) => "index buffer",
            Binding::VertexShader(_) => "vertex shader",
            Binding::PixelShader(_) => "pixel shader",
            Binding::ConstantBuffers { .. } => "constant buffers",
            Binding::Samplers { .. } => "samplers",
            Binding::Textures { .. } => "textures",
            Binding::RenderTargets { .. } => "render targets",
            Binding::Viewport(_) => "viewport",
            Binding::ScissorRectangle(_) => "scissor rectangle",
            Binding::DepthStencilState(_) => "depth stencil state",
            Binding::BlendState(_) => "blend state",
            Binding::RasterizerState(_) => "rasterizer state",
            Binding::InputLayout(_) => "input layout",
            Binding::PrimitiveTopology(_) => "primitive topology",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawCall {
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        index_offset: u32,
        vertex_offset: u32,
    },
}

/// 当前帧的绑定状态，每帧结束时清空
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingTable {
    pub vertex_buffer: Option<BoundBuffer>,
    pub index_buffer: Option<(BoundBuffer, IndexFormat)>,
    pub vertex_shader: Option<BoundShader>,
    pub pixel_shader: Option<BoundShader>,
    pub vs_constant_buffers: [Option<BoundBuffer>; MAX_CONSTANT_BUFFER_SLOTS as usize],
    pub ps_constant_buffers: [Option<BoundBuffer>; MAX_CONSTANT_BUFFER_SLOTS as usize],
    pub samplers: [Option<BoundSampler>; MAX_SAMPLER_SLOTS as usize],
    pub textures: [Option<BoundTexture>; MAX_TEXTURE_SLOTS as usize],
    pub render_targets: Vec<BoundTexture>,
    pub depth_stencil: Option<BoundTexture>,
    pub viewport: Option<Viewport>,
    pub scissor: Option<Rectangle>,
    pub depth_stencil_state: Option<BoundState<DepthStencilDesc>>,
    pub blend_state: Option<BoundState<BlendDesc>>,
    pub rasterizer_state: Option<BoundState<RasterizerDesc>>,
    pub input_layout: Option<BoundState<InputLayoutDesc>>,
    pub primitive_topology: Option<PrimitiveTopology>,
}

/// 写入 slot，返回值是否发生了变化
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn replace_range<T: PartialEq + Clone>(slots: &mut [Option<T>], start_slot: u32, values: &[T]) -> bool {
    let mut changed = false;
    for (slot, value) in slots.iter_mut().skip(start_slot as usize).zip(values) {
        changed |= replace(slot, Some(value.clone()));
    }
    changed
}

impl BindingTable {
    /// 将 binding 写入绑定表
    ///
    /// # return
    /// 绑定表是否发生了变化；没有变化时不需要通知后端
    ///
    /// slot 范围由调用者保证
    pub fn apply(&mut self, binding: &Binding) -> bool {
        match binding {
            Binding::VertexBuffer(buffer) => replace(&mut self.vertex_buffer, Some(*buffer)),
            Binding::IndexBuffer(buffer, format) => replace(&mut self.index_buffer, Some((*buffer, *format))),
            Binding::VertexShader(shader) => replace(&mut self.vertex_shader, Some(*shader)),
            Binding::PixelShader(shader) => replace(&mut self.pixel_shader, Some(*shader)),
            Binding::ConstantBuffers {
                start_slot,
                buffers,
                scope,
            } => {
                let mut changed = false;
                if matches!(scope, BufferScope::VertexShader | BufferScope::Global) {
                    changed |= replace_range(&mut self.vs_constant_buffers, *start_slot, buffers);
                }
                if matches!(scope, BufferScope::PixelShader | BufferScope::Global) {
                    changed |= replace_range(&mut self.ps_constant_buffers, *start_slot, buffers);
                }
                changed
            }
            Binding::Samplers { start_slot, samplers } => replace_range(&mut self.samplers, *start_slot, samplers),
            Binding::Textures { start_slot, textures } => replace_range(&mut self.textures, *start_slot, textures),
            Binding::RenderTargets {
                targets,
                depth_stencil,
            } => {
                let targets_changed = replace(&mut self.render_targets, targets.clone());
                let depth_changed = replace(&mut self.depth_stencil, *depth_stencil);
                targets_changed || depth_changed
            }
            Binding::Viewport(viewport) => replace(&mut self.viewport, Some(*viewport)),
            Binding::ScissorRectangle(rect) => replace(&mut self.scissor, Some(*rect)),
            Binding::DepthStencilState(state) => replace(&mut self.depth_stencil_state, Some(state.clone())),
            Binding::BlendState(state) => replace(&mut self.blend_state, Some(state.clone())),
            Binding::RasterizerState(state) => replace(&mut self.rasterizer_state, Some(state.clone())),
            Binding::InputLayout(state) => replace(&mut self.input_layout, Some(state.clone())),
            Binding::PrimitiveTopology(topology) => replace(&mut self.primitive_topology, Some(*topology)),
        }
    }

    /// 写入 binding 是否会改变绑定表，不修改当前状态
    pub fn would_change(&self, binding: &Binding) -> bool {
        self.clone().apply(binding)
    }

    /// draw 之前必须存在的绑定，返回第一个缺失的绑定名
    pub fn missing_binding(&self, draw: &DrawCall) -> Option<&'static str> {
        if self.vertex_buffer.is_none() {
            return Some("vertex buffer");
        }
        if self.vertex_shader.is_none() {
            return Some("vertex shader");
        }
        if self.input_layout.is_none() {
            return Some("input layout");
        }
        if self.render_targets.is_empty() && self.depth_stencil.is_none() {
            return Some("render target");
        }
        if matches!(draw, DrawCall::DrawIndexed { .. }) && self.index_buffer.is_none() {
            return Some("index buffer");
        }
        None
    }

    /// 移除所有引用了某个对象的绑定，对象销毁时调用
    pub fn forget(&mut self, id: ObjectId) {
        if self.vertex_buffer.is_some_and(|b| b.id == id) {
            self.vertex_buffer = None;
        }
        if self.index_buffer.is_some_and(|(b, _)| b.id == id) {
            self.index_buffer = None;
        }
        if self.vertex_shader.is_some_and(|s| s.id == id) {
            self.vertex_shader = None;
        }
        if self.pixel_shader.is_some_and(|s| s.id == id) {
            self.pixel_shader = None;
        }
        for slot in self.vs_constant_buffers.iter_mut().chain(self.ps_constant_buffers.iter_mut()) {
            if slot.is_some_and(|b| b.id == id) {
                *slot = None;
            }
        }
        for slot in self.samplers.iter_mut() {
            if slot.is_some_and(|s| s.id == id) {
                *slot = None;
            }
        }
        for slot in self.textures.iter_mut() {
            if slot.is_some_and(|t| t.id == id) {
                *slot = None;
            }
        }
        self.render_targets.retain(|t| t.id != id);
        if self.depth_stencil.is_some_and(|t| t.id == id) {
            self.depth_stencil = None;
        }
    }

    /// 帧结束时清空
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::object::RhiObject;

    fn buffer(handles: &mut SlotMap<BufferHandle, ()>) -> BoundBuffer {
        BoundBuffer {
            id: RhiObject::new("buffer").id(),
            handle: handles.insert(()),
            stride: 16,
            count: 1,
            size: 16,
        }
    }

    #[test]
    fn test_same_binding_twice_is_unchanged() {
        let mut handles = SlotMap::with_key();
        let mut table = BindingTable::default();
        let binding = Binding::VertexBuffer(buffer(&mut handles));
        assert!(table.apply(&binding));
        assert!(!table.apply(&binding));
        assert!(table.apply(&Binding::VertexBuffer(buffer(&mut handles))));
    }

    #[test]
    fn test_would_change_leaves_table_untouched() {
        let mut handles = SlotMap::with_key();
        let mut table = BindingTable::default();
        let binding = Binding::VertexBuffer(buffer(&mut handles));
        assert!(table.would_change(&binding));
        assert!(table.vertex_buffer.is_none());

        table.apply(&binding);
        assert!(!table.would_change(&binding));
    }

    #[test]
    fn test_global_constant_buffers_bind_both_stages() {
        let mut handles = SlotMap::with_key();
        let mut table = BindingTable::default();
        let cb = buffer(&mut handles);
        let binding = Binding::ConstantBuffers {
            start_slot: 2,
            buffers: vec![cb],
            scope: BufferScope::Global,
        };
        assert!(table.apply(&binding));
        assert_eq!(table.vs_constant_buffers[2], Some(cb));
        assert_eq!(table.ps_constant_buffers[2], Some(cb));

        // 只改 pixel shader 的 slot 时，vertex shader 的不变
        assert!(!table.apply(&Binding::ConstantBuffers {
            start_slot: 2,
            buffers: vec![cb],
            scope: BufferScope::PixelShader,
        }));
    }

    #[test]
    fn test_missing_binding_order() {
        let mut handles = SlotMap::with_key();
        let mut table = BindingTable::default();
        let draw = DrawCall::DrawIndexed {
            index_count: 3,
            index_offset: 0,
            vertex_offset: 0,
        };
        assert_eq!(table.missing_binding(&draw), Some("vertex buffer"));
        table.apply(&Binding::VertexBuffer(buffer(&mut handles)));
        assert_eq!(table.missing_binding(&draw), Some("vertex shader"));
    }

    #[test]
    fn test_reset_and_forget() {
        let mut handles = SlotMap::with_key();
        let mut table = BindingTable::default();
        let vb = buffer(&mut handles);
        table.apply(&Binding::VertexBuffer(vb));
        table.apply(&Binding::Viewport(Viewport::new(0.0, 0.0, 8.0, 8.0)));

        table.forget(vb.id);
        assert!(table.vertex_buffer.is_none());
        assert!(table.viewport.is_some());

        table.reset();
        assert_eq!(table, BindingTable::default());
    }
}

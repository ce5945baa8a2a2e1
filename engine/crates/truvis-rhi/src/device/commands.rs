use crate::device::{Binding, BoundState, Device, DrawCall};
use crate::error::{RhiError, RhiResult, log_err};
use crate::pipeline_state::{BlendState, DepthStencilState, InputLayout, RasterizerState};
use crate::resources::{ConstantBuffer, IndexBuffer, RenderTarget, Sampler, VertexBuffer};
use crate::shader::Shader;
use crate::types::{
    BufferScope, ClearFlags, Color, MAX_CONSTANT_BUFFER_SLOTS, MAX_RENDER_TARGETS, MAX_SAMPLER_SLOTS,
    MAX_TEXTURE_SLOTS, PrimitiveTopology, Rectangle, ShaderStage, Viewport,
};

/// slot 范围检查
fn check_slots(what: &str, start_slot: u32, count: usize, max_slots: u32) -> RhiResult<()> {
    if count == 0 {
        return Err(log_err(RhiError::invalid_parameter(format!("{}: empty list", what))));
    }
    if start_slot as u64 + count as u64 > max_slots as u64 {
        return Err(log_err(RhiError::invalid_parameter(format!(
            "{}: slots {}..{} exceed the limit of {}",
            what,
            start_slot,
            start_slot as u64 + count as u64,
            max_slots
        ))));
    }
    Ok(())
}

// frame
impl Device {
    /// 开始一帧；已经处于一帧之中时什么也不做
    pub fn frame_begin(&self) -> RhiResult<()> {
        self.with_backend("frame_begin", |backend| self.ensure_frame(backend))
    }

    /// 提交当前帧，并清空绑定表
    ///
    /// 未关闭的 debug event 会被关闭并提交，然后以 [`RhiError::UnbalancedEvents`] 报告
    pub fn frame_end(&self) -> RhiResult<()> {
        let unbalanced = self.event_depth.get();
        let submitted = self.with_backend("frame_end", |backend| {
            if self.frame_active.get() {
                for _ in 0..unbalanced {
                    backend.end_event();
                }
                self.event_depth.set(0);
                // 提交失败时当前帧也已经作废
                self.frame_active.set(false);
                backend.end_frame()?;
                self.frame_count.set(self.frame_count.get() + 1);
            }
            Ok(())
        });
        // 无论提交是否成功，绑定都不会延续到下一帧
        if self.is_initialized() {
            self.bindings.borrow_mut().reset();
        }
        submitted?;

        if unbalanced > 0 {
            return Err(log_err(RhiError::UnbalancedEvents(unbalanced)));
        }
        Ok(())
    }

    /// 等待 GPU 完成所有工作，销毁资源之前调用
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.with_backend("wait_idle", |backend| backend.wait_idle())
    }
}

// bind
impl Device {
    /// 写入绑定表，只有发生变化时才通知后端
    fn bind(&self, binding: Binding) -> RhiResult<()> {
        self.check_ready(binding.name())?;
        if !self.bindings.borrow().would_change(&binding) {
            return Ok(());
        }
        // 后端接受之后才写入绑定表，失败的绑定可以重试
        self.with_backend(binding.name(), |backend| backend.bind_resource(&binding))?;
        self.bindings.borrow_mut().apply(&binding);
        Ok(())
    }

    pub fn set_vertex_buffer(&self, buffer: &VertexBuffer) -> RhiResult<()> {
        self.check_ready("set_vertex_buffer")?;
        self.check_owner(buffer.device(), "vertex buffer")?;
        self.bind(Binding::VertexBuffer(buffer.bound()?))
    }

    pub fn set_index_buffer(&self, buffer: &IndexBuffer) -> RhiResult<()> {
        self.check_ready("set_index_buffer")?;
        self.check_owner(buffer.device(), "index buffer")?;
        self.bind(Binding::IndexBuffer(buffer.bound()?, buffer.index_format()))
    }

    pub fn set_vertex_shader(&self, shader: &Shader) -> RhiResult<()> {
        self.check_ready("set_vertex_shader")?;
        self.check_owner(shader.device(), "vertex shader")?;
        if shader.stage() != ShaderStage::Vertex {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{} is not a vertex shader",
                shader.name()
            ))));
        }
        self.bind(Binding::VertexShader(shader.bound()))
    }

    pub fn set_pixel_shader(&self, shader: &Shader) -> RhiResult<()> {
        self.check_ready("set_pixel_shader")?;
        self.check_owner(shader.device(), "pixel shader")?;
        if shader.stage() != ShaderStage::Pixel {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{} is not a pixel shader",
                shader.name()
            ))));
        }
        self.bind(Binding::PixelShader(shader.bound()))
    }

    pub fn set_constant_buffers(
        &self,
        start_slot: u32,
        buffers: &[&ConstantBuffer],
        scope: BufferScope,
    ) -> RhiResult<()> {
        self.check_ready("set_constant_buffers")?;
        check_slots("set_constant_buffers", start_slot, buffers.len(), MAX_CONSTANT_BUFFER_SLOTS)?;
        let bound = buffers
            .iter()
            .map(|buffer| {
                self.check_owner(buffer.device(), "constant buffer")?;
                buffer.bound()
            })
            .collect::<RhiResult<Vec<_>>>()?;
        self.bind(Binding::ConstantBuffers {
            start_slot,
            buffers: bound,
            scope,
        })
    }

    pub fn set_samplers(&self, start_slot: u32, samplers: &[&Sampler]) -> RhiResult<()> {
        self.check_ready("set_samplers")?;
        check_slots("set_samplers", start_slot, samplers.len(), MAX_SAMPLER_SLOTS)?;
        let bound = samplers
            .iter()
            .map(|sampler| {
                self.check_owner(sampler.device(), "sampler")?;
                Ok(sampler.bound())
            })
            .collect::<RhiResult<Vec<_>>>()?;
        self.bind(Binding::Samplers {
            start_slot,
            samplers: bound,
        })
    }

    /// 将 render target 作为 shader resource 绑定
    pub fn set_textures(&self, start_slot: u32, textures: &[&RenderTarget]) -> RhiResult<()> {
        self.check_ready("set_textures")?;
        check_slots("set_textures", start_slot, textures.len(), MAX_TEXTURE_SLOTS)?;
        let bound = textures
            .iter()
            .map(|texture| {
                self.check_owner(texture.device(), "texture")?;
                Ok(texture.bound())
            })
            .collect::<RhiResult<Vec<_>>>()?;
        self.bind(Binding::Textures {
            start_slot,
            textures: bound,
        })
    }

    pub fn set_render_targets(
        &self,
        targets: &[&RenderTarget],
        depth_stencil: Option<&RenderTarget>,
    ) -> RhiResult<()> {
        self.check_ready("set_render_targets")?;
        if targets.is_empty() && depth_stencil.is_none() {
            return Err(log_err(RhiError::invalid_parameter("set_render_targets: nothing to bind")));
        }
        if targets.len() > MAX_RENDER_TARGETS {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "set_render_targets: at most {} render targets, got {}",
                MAX_RENDER_TARGETS,
                targets.len()
            ))));
        }

        let mut bound_targets = Vec::with_capacity(targets.len());
        for target in targets {
            self.check_owner(target.device(), "render target")?;
            if target.format().is_depth() {
                return Err(log_err(RhiError::invalid_parameter(format!(
                    "{} has a depth format and can not be a color target",
                    target.name()
                ))));
            }
            bound_targets.push(target.bound());
        }
        let bound_depth = match depth_stencil {
            Some(depth) => {
                self.check_owner(depth.device(), "depth stencil")?;
                if !depth.format().is_depth() {
                    return Err(log_err(RhiError::invalid_parameter(format!(
                        "{} is not a depth stencil target",
                        depth.name()
                    ))));
                }
                Some(depth.bound())
            }
            None => None,
        };

        // 所有 attachment 的尺寸必须一致
        let mut extents = bound_targets.iter().chain(bound_depth.iter()).map(|t| (t.width, t.height));
        if let Some(first) = extents.next() {
            if extents.any(|extent| extent != first) {
                return Err(log_err(RhiError::invalid_parameter(
                    "set_render_targets: attachments have different sizes",
                )));
            }
        }

        self.bind(Binding::RenderTargets {
            targets: bound_targets,
            depth_stencil: bound_depth,
        })
    }

    pub fn set_viewport(&self, viewport: Viewport) -> RhiResult<()> {
        self.check_ready("set_viewport")?;
        if !(viewport.width > 0.0 && viewport.height > 0.0) {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "viewport size must be positive, got {}x{}",
                viewport.width, viewport.height
            ))));
        }
        self.bind(Binding::Viewport(viewport))
    }

    pub fn set_scissor_rectangle(&self, rectangle: Rectangle) -> RhiResult<()> {
        self.check_ready("set_scissor_rectangle")?;
        self.bind(Binding::ScissorRectangle(rectangle))
    }

    pub fn set_depth_stencil_state(&self, state: &DepthStencilState) -> RhiResult<()> {
        self.check_ready("set_depth_stencil_state")?;
        self.check_owner(state.device(), "depth stencil state")?;
        self.bind(Binding::DepthStencilState(BoundState {
            id: state.id(),
            desc: *state.desc(),
        }))
    }

    pub fn set_blend_state(&self, state: &BlendState) -> RhiResult<()> {
        self.check_ready("set_blend_state")?;
        self.check_owner(state.device(), "blend state")?;
        self.bind(Binding::BlendState(BoundState {
            id: state.id(),
            desc: *state.desc(),
        }))
    }

    pub fn set_rasterizer_state(&self, state: &RasterizerState) -> RhiResult<()> {
        self.check_ready("set_rasterizer_state")?;
        self.check_owner(state.device(), "rasterizer state")?;
        self.bind(Binding::RasterizerState(BoundState {
            id: state.id(),
            desc: *state.desc(),
        }))
    }

    pub fn set_input_layout(&self, layout: &InputLayout) -> RhiResult<()> {
        self.check_ready("set_input_layout")?;
        self.check_owner(layout.device(), "input layout")?;
        self.bind(Binding::InputLayout(BoundState {
            id: layout.id(),
            desc: layout.desc().clone(),
        }))
    }

    pub fn set_primitive_topology(&self, topology: PrimitiveTopology) -> RhiResult<()> {
        self.check_ready("set_primitive_topology")?;
        self.bind(Binding::PrimitiveTopology(topology))
    }
}

// draw & clear
impl Device {
    pub fn draw(&self, vertex_count: u32) -> RhiResult<()> {
        self.submit(DrawCall::Draw { vertex_count })
    }

    pub fn draw_indexed(&self, index_count: u32, index_offset: u32, vertex_offset: u32) -> RhiResult<()> {
        self.submit(DrawCall::DrawIndexed {
            index_count,
            index_offset,
            vertex_offset,
        })
    }

    fn submit(&self, draw: DrawCall) -> RhiResult<()> {
        self.check_ready("draw")?;

        let bindings = self.bindings.borrow();
        if let Some(missing) = bindings.missing_binding(&draw) {
            return Err(log_err(RhiError::MissingBinding(missing)));
        }

        match draw {
            DrawCall::Draw { vertex_count } => {
                let vertex_buffer = bindings.vertex_buffer.map_or(0, |b| b.count);
                if vertex_count == 0 || vertex_count > vertex_buffer {
                    return Err(log_err(RhiError::invalid_parameter(format!(
                        "draw of {} vertices with {} vertices bound",
                        vertex_count, vertex_buffer
                    ))));
                }
            }
            DrawCall::DrawIndexed {
                index_count,
                index_offset,
                ..
            } => {
                let index_buffer = bindings.index_buffer.map_or(0, |(b, _)| b.count);
                if index_count == 0 || index_offset as u64 + index_count as u64 > index_buffer as u64 {
                    return Err(log_err(RhiError::invalid_parameter(format!(
                        "indexed draw of {} indices at offset {} with {} indices bound",
                        index_count, index_offset, index_buffer
                    ))));
                }
            }
        }

        self.with_backend("draw", |backend| {
            self.ensure_frame(backend)?;
            backend.submit_draw(&draw, &bindings)
        })
    }

    pub fn clear_render_target(&self, target: &RenderTarget, color: Color) -> RhiResult<()> {
        self.check_ready("clear_render_target")?;
        self.check_owner(target.device(), "render target")?;
        if target.format().is_depth() {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{} is a depth stencil target, use clear_depth_stencil",
                target.name()
            ))));
        }
        self.with_backend("clear_render_target", |backend| {
            self.ensure_frame(backend)?;
            backend.clear_render_target(target.handle(), color)
        })
    }

    pub fn clear_depth_stencil(
        &self,
        target: &RenderTarget,
        flags: ClearFlags,
        depth: f32,
        stencil: u32,
    ) -> RhiResult<()> {
        self.check_ready("clear_depth_stencil")?;
        self.check_owner(target.device(), "depth stencil")?;
        if !target.format().is_depth() {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{} is not a depth stencil target",
                target.name()
            ))));
        }
        if flags.is_empty() {
            return Err(log_err(RhiError::invalid_parameter("clear_depth_stencil: empty clear flags")));
        }
        if flags.contains(ClearFlags::STENCIL) && !target.format().has_stencil() {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{} has no stencil aspect",
                target.name()
            ))));
        }
        if !(0.0..=1.0).contains(&depth) {
            return Err(log_err(RhiError::invalid_parameter(format!("clear depth {} is out of [0, 1]", depth))));
        }
        self.with_backend("clear_depth_stencil", |backend| {
            self.ensure_frame(backend)?;
            backend.clear_depth_stencil(target.handle(), flags, depth, stencil)
        })
    }
}

// debug event
impl Device {
    pub fn event_begin(&self, name: &str) -> RhiResult<()> {
        self.with_backend("event_begin", |backend| {
            self.ensure_frame(backend)?;
            backend.begin_event(name);
            Ok(())
        })?;
        self.event_depth.set(self.event_depth.get() + 1);
        Ok(())
    }

    pub fn event_end(&self) -> RhiResult<()> {
        self.check_ready("event_end")?;
        if self.event_depth.get() == 0 {
            return Err(log_err(RhiError::invalid_parameter("event_end without a matching event_begin")));
        }
        self.with_backend("event_end", |backend| {
            backend.end_event();
            Ok(())
        })?;
        self.event_depth.set(self.event_depth.get() - 1);
        Ok(())
    }
}

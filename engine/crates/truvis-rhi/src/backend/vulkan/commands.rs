use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::VulkanBackend;
use crate::backend::vulkan::conversions;
use crate::backend::vulkan::logical_device::{
    PS_CONSTANT_BUFFER_BINDING, SAMPLER_BINDING, TEXTURE_BINDING, VS_CONSTANT_BUFFER_BINDING, VulkanDevice,
};
use crate::backend::vulkan::pipeline::{PipelineDesc, PipelineKey};
use crate::backend::vulkan::resources::VulkanTexture;
use crate::device::{BindingTable, BoundBuffer, DrawCall};
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::TextureHandle;
use crate::pipeline_state::{BlendDesc, DepthStencilDesc, RasterizerDesc};
use crate::types::{ClearFlags, Color};

/// 记录 layout 转换，同时作为前后命令之间的 memory barrier
pub(crate) fn transition_texture(
    device: &VulkanDevice,
    command_buffer: vk::CommandBuffer,
    texture: &mut VulkanTexture,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .old_layout(texture.layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(texture.image)
        .subresource_range(full_range(conversions::vk_aspect(texture.desc.format)));
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    unsafe {
        device.ash_device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
    }
    texture.layout = new_layout;
}

#[inline]
fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn stale(what: &str) -> RhiError {
    log_err(RhiError::not_initialized(format!("{} was already destroyed", what)))
}

// clear
impl VulkanBackend {
    pub(super) fn record_clear_color(&mut self, target: TextureHandle, color: Color) -> RhiResult<()> {
        let device = self.device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let command_buffer = device.command_buffer()?;
        let texture = self.textures.get_mut(target).ok_or_else(|| stale("render target"))?;

        transition_texture(device, command_buffer, texture, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let clear_value = vk::ClearColorValue {
            float32: color.to_array(),
        };
        unsafe {
            device.ash_device.cmd_clear_color_image(
                command_buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[full_range(vk::ImageAspectFlags::COLOR)],
            );
        }
        Ok(())
    }

    pub(super) fn record_clear_depth_stencil(
        &mut self,
        target: TextureHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u32,
    ) -> RhiResult<()> {
        let device = self.device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let command_buffer = device.command_buffer()?;
        let texture = self.textures.get_mut(target).ok_or_else(|| stale("depth stencil target"))?;

        transition_texture(device, command_buffer, texture, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let clear_value = vk::ClearDepthStencilValue { depth, stencil };
        unsafe {
            device.ash_device.cmd_clear_depth_stencil_image(
                command_buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[full_range(conversions::vk_clear_aspect(flags))],
            );
        }
        Ok(())
    }
}

// draw
impl VulkanBackend {
    /// 一次 draw 对应一个 dynamic rendering 区间
    pub(super) fn record_draw(&mut self, draw: &DrawCall, bindings: &BindingTable) -> RhiResult<()> {
        let Self {
            device,
            buffers,
            shaders,
            textures,
            samplers,
            pipelines,
            ..
        } = self;
        let device = device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let command_buffer = device.command_buffer()?;

        let vertex_buffer = bindings.vertex_buffer.ok_or(RhiError::MissingBinding("vertex buffer"))?;
        let vertex_shader = bindings.vertex_shader.ok_or(RhiError::MissingBinding("vertex shader"))?;
        let input_layout = bindings.input_layout.as_ref().ok_or(RhiError::MissingBinding("input layout"))?;

        let (vertex_shader, vertex_module) = vertex_shader
            .module
            .and_then(|module| shaders.get(module).map(|shader| (module, shader.handle)))
            .ok_or_else(|| log_err(RhiError::not_initialized("vertex shader has no shader module")))?;
        let (pixel_shader, pixel_module) = match bindings.pixel_shader {
            Some(pixel_shader) => {
                let (module, handle) = pixel_shader
                    .module
                    .and_then(|module| shaders.get(module).map(|shader| (module, shader.handle)))
                    .ok_or_else(|| log_err(RhiError::not_initialized("pixel shader has no shader module")))?;
                (Some(module), Some(handle))
            }
            None => (None, None),
        };

        // 同一张 texture 不能同时作为 attachment 和 shader resource
        let attachments = bindings.render_targets.iter().chain(bindings.depth_stencil.iter()).collect_vec();
        let first_attachment =
            attachments.first().copied().ok_or(RhiError::MissingBinding("render target"))?;
        if let Some(conflict) = bindings
            .textures
            .iter()
            .flatten()
            .find(|texture| attachments.iter().any(|target| target.handle == texture.handle))
        {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "texture {:?} is bound as both a render target and a shader resource",
                conflict.id
            ))));
        }

        // layout 转换
        for bound in bindings.textures.iter().flatten() {
            let texture = textures.get_mut(bound.handle).ok_or_else(|| stale("texture"))?;
            transition_texture(device, command_buffer, texture, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
        for bound in &bindings.render_targets {
            let texture = textures.get_mut(bound.handle).ok_or_else(|| stale("render target"))?;
            transition_texture(device, command_buffer, texture, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }
        if let Some(bound) = &bindings.depth_stencil {
            let texture = textures.get_mut(bound.handle).ok_or_else(|| stale("depth stencil target"))?;
            transition_texture(device, command_buffer, texture, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        }

        // pipeline
        let key = PipelineKey {
            vertex_shader,
            pixel_shader,
            input_layout: input_layout.id,
            depth_stencil_state: bindings.depth_stencil_state.as_ref().map(|state| state.id),
            blend_state: bindings.blend_state.as_ref().map(|state| state.id),
            rasterizer_state: bindings.rasterizer_state.as_ref().map(|state| state.id),
            topology: bindings.primitive_topology.unwrap_or_default(),
            color_formats: bindings.render_targets.iter().map(|target| target.format).collect_vec(),
            depth_format: bindings.depth_stencil.map(|target| target.format),
        };
        let pipeline = match pipelines.get(&key) {
            Some(pipeline) => *pipeline,
            None => {
                let desc = PipelineDesc {
                    key: &key,
                    vertex_module,
                    pixel_module,
                    input_layout: &input_layout.desc,
                    depth_stencil: bindings
                        .depth_stencil_state
                        .as_ref()
                        .map_or_else(|| DepthStencilDesc::new(key.depth_format.is_some()), |state| state.desc),
                    blend: bindings.blend_state.as_ref().map_or_else(|| BlendDesc::new(false), |state| state.desc),
                    rasterizer: bindings.rasterizer_state.as_ref().map_or_else(RasterizerDesc::default, |state| {
                        state.desc
                    }),
                };
                let pipeline = device.create_graphics_pipeline(&desc)?;
                pipelines.insert(key, pipeline);
                pipeline
            }
        };

        // attachments
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: first_attachment.width,
                height: first_attachment.height,
            },
        };
        let color_attachments = bindings
            .render_targets
            .iter()
            .map(|bound| {
                let texture = textures.get(bound.handle).ok_or_else(|| stale("render target"))?;
                Ok(vk::RenderingAttachmentInfo::default()
                    .image_view(texture.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE))
            })
            .collect::<RhiResult<Vec<_>>>()?;
        let depth_attachment = match &bindings.depth_stencil {
            Some(bound) => {
                let texture = textures.get(bound.handle).ok_or_else(|| stale("depth stencil target"))?;
                Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(texture.view)
                        .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                        .load_op(vk::AttachmentLoadOp::LOAD)
                        .store_op(vk::AttachmentStoreOp::STORE),
                )
            }
            None => None,
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let (Some(attachment), Some(bound)) = (&depth_attachment, &bindings.depth_stencil) {
            rendering_info = rendering_info.depth_attachment(attachment);
            if bound.format.has_stencil() {
                rendering_info = rendering_info.stencil_attachment(attachment);
            }
        }

        // descriptors
        let buffer_info = |bound: &BoundBuffer| -> RhiResult<[vk::DescriptorBufferInfo; 1]> {
            let buffer = buffers.get(bound.handle).ok_or_else(|| stale("constant buffer"))?;
            Ok([vk::DescriptorBufferInfo {
                buffer: buffer.handle,
                offset: 0,
                range: bound.size,
            }])
        };
        let mut buffer_infos = Vec::new();
        for (slot, bound) in bindings.vs_constant_buffers.iter().enumerate() {
            if let Some(bound) = bound {
                buffer_infos.push((VS_CONSTANT_BUFFER_BINDING + slot as u32, buffer_info(bound)?));
            }
        }
        for (slot, bound) in bindings.ps_constant_buffers.iter().enumerate() {
            if let Some(bound) = bound {
                buffer_infos.push((PS_CONSTANT_BUFFER_BINDING + slot as u32, buffer_info(bound)?));
            }
        }
        let mut image_infos = Vec::new();
        for (slot, bound) in bindings.textures.iter().enumerate() {
            if let Some(bound) = bound {
                let texture = textures.get(bound.handle).ok_or_else(|| stale("texture"))?;
                image_infos.push((
                    TEXTURE_BINDING + slot as u32,
                    vk::DescriptorType::SAMPLED_IMAGE,
                    [vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: texture.sampled_view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }],
                ));
            }
        }
        for (slot, bound) in bindings.samplers.iter().enumerate() {
            if let Some(bound) = bound {
                let sampler = samplers.get(bound.handle).ok_or_else(|| stale("sampler"))?;
                image_infos.push((
                    SAMPLER_BINDING + slot as u32,
                    vk::DescriptorType::SAMPLER,
                    [vk::DescriptorImageInfo {
                        sampler: *sampler,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    }],
                ));
            }
        }
        let mut writes = Vec::with_capacity(buffer_infos.len() + image_infos.len());
        for (binding, info) in &buffer_infos {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(info),
            );
        }
        for (binding, ty, info) in &image_infos {
            writes.push(vk::WriteDescriptorSet::default().dst_binding(*binding).descriptor_type(*ty).image_info(info));
        }

        let vk_vertex_buffer = buffers.get(vertex_buffer.handle).ok_or_else(|| stale("vertex buffer"))?.handle;
        let index_buffer = match (draw, &bindings.index_buffer) {
            (DrawCall::DrawIndexed { .. }, Some((bound, format))) => Some((
                buffers.get(bound.handle).ok_or_else(|| stale("index buffer"))?.handle,
                conversions::vk_index_type(*format),
            )),
            (DrawCall::DrawIndexed { .. }, None) => return Err(RhiError::MissingBinding("index buffer")),
            _ => None,
        };

        let viewport = match bindings.viewport {
            Some(viewport) => vk::Viewport {
                x: viewport.x,
                y: viewport.y,
                width: viewport.width,
                height: viewport.height,
                min_depth: viewport.min_depth,
                max_depth: viewport.max_depth,
            },
            None => vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: render_area.extent.width as f32,
                height: render_area.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        };
        let scissor = match bindings.scissor {
            Some(rect) => vk::Rect2D {
                offset: vk::Offset2D { x: rect.x, y: rect.y },
                extent: vk::Extent2D {
                    width: rect.width,
                    height: rect.height,
                },
            },
            None => render_area,
        };

        let ash_device = &device.ash_device;
        unsafe {
            ash_device.cmd_begin_rendering(command_buffer, &rendering_info);
            ash_device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            ash_device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            ash_device.cmd_set_scissor(command_buffer, 0, &[scissor]);
            if !writes.is_empty() {
                device.push_descriptor.cmd_push_descriptor_set(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    device.pipeline_layout,
                    0,
                    &writes,
                );
            }
            ash_device.cmd_bind_vertex_buffers(command_buffer, 0, &[vk_vertex_buffer], &[0]);
            match *draw {
                DrawCall::Draw { vertex_count } => {
                    ash_device.cmd_draw(command_buffer, vertex_count, 1, 0, 0);
                }
                DrawCall::DrawIndexed {
                    index_count,
                    index_offset,
                    vertex_offset,
                } => {
                    if let Some((vk_index_buffer, index_type)) = index_buffer {
                        ash_device.cmd_bind_index_buffer(command_buffer, vk_index_buffer, 0, index_type);
                    }
                    ash_device.cmd_draw_indexed(command_buffer, index_count, 1, index_offset, vertex_offset as i32, 0);
                }
            }
            ash_device.cmd_end_rendering(command_buffer);
        }
        Ok(())
    }
}

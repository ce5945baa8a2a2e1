use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::conversions;
use crate::backend::vulkan::logical_device::VulkanDevice;
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::ShaderHandle;
use crate::object::ObjectId;
use crate::pipeline_state::{BlendDesc, DepthStencilDesc, RasterizerDesc};
use crate::types::{Format, PrimitiveTopology};
use crate::vertex::InputLayoutDesc;

/// 唯一确定一条 graphics pipeline 的状态
///
/// 管线状态对象不可变，所以用 id 代替完整的描述；
/// shader 使用带代数的 handle，原生 handle 被驱动复用时不会命中旧的 pipeline
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub vertex_shader: ShaderHandle,
    pub pixel_shader: Option<ShaderHandle>,
    pub input_layout: ObjectId,
    pub depth_stencil_state: Option<ObjectId>,
    pub blend_state: Option<ObjectId>,
    pub rasterizer_state: Option<ObjectId>,
    pub topology: PrimitiveTopology,
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
}

impl PipelineKey {
    #[inline]
    pub fn uses_shader(&self, shader: ShaderHandle) -> bool {
        self.vertex_shader == shader || self.pixel_shader == Some(shader)
    }
}

/// 创建 pipeline 所需的完整描述，未绑定的状态使用默认值
pub(crate) struct PipelineDesc<'a> {
    pub key: &'a PipelineKey,
    pub vertex_module: vk::ShaderModule,
    pub pixel_module: Option<vk::ShaderModule>,
    pub input_layout: &'a InputLayoutDesc,
    pub depth_stencil: DepthStencilDesc,
    pub blend: BlendDesc,
    pub rasterizer: RasterizerDesc,
}

impl VulkanDevice {
    pub fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> RhiResult<vk::Pipeline> {
        let key = desc.key;

        let mut shader_stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_module)
                .name(c"main"),
        ];
        if let Some(pixel_module) = desc.pixel_module {
            shader_stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(pixel_module)
                    .name(c"main"),
            );
        }

        let vertex_binding_desc = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.input_layout.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attribute_desc = desc
            .input_layout
            .elements
            .iter()
            .map(|element| vk::VertexInputAttributeDescription {
                location: element.location,
                binding: 0,
                format: conversions::vk_format(element.format),
                offset: element.offset,
            })
            .collect_vec();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_binding_desc)
            .vertex_attribute_descriptions(&vertex_attribute_desc);

        let input_assembly_state =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(conversions::vk_topology(key.topology));

        // viewport 和 scissor 都是 dynamic state
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let rasterizer = &desc.rasterizer;
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(conversions::vk_polygon_mode(rasterizer.fill_mode))
            .cull_mode(conversions::vk_cull_mode(rasterizer.cull_mode))
            .front_face(if rasterizer.front_clockwise {
                vk::FrontFace::CLOCKWISE
            } else {
                vk::FrontFace::COUNTER_CLOCKWISE
            })
            .depth_bias_enable(rasterizer.depth_bias != 0.0)
            .depth_bias_constant_factor(rasterizer.depth_bias)
            .line_width(rasterizer.line_width);

        let multisample_state =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = &desc.depth_stencil;
        let stencil_op = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            compare_mask: depth_stencil.stencil_read_mask as u32,
            write_mask: depth_stencil.stencil_write_mask as u32,
            reference: 0,
        };
        let has_depth = key.depth_format.is_some();
        let has_stencil = key.depth_format.is_some_and(|format| format.has_stencil());
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth && depth_stencil.depth_test)
            .depth_write_enable(has_depth && depth_stencil.depth_write)
            .depth_compare_op(conversions::vk_compare_op(depth_stencil.depth_compare))
            .stencil_test_enable(has_stencil && depth_stencil.stencil_test)
            .front(stencil_op)
            .back(stencil_op);

        let blend = &desc.blend;
        let color_blend_attachments = key
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(blend.enabled)
                    .src_color_blend_factor(conversions::vk_blend_factor(blend.src_color))
                    .dst_color_blend_factor(conversions::vk_blend_factor(blend.dst_color))
                    .color_blend_op(conversions::vk_blend_op(blend.color_op))
                    .src_alpha_blend_factor(conversions::vk_blend_factor(blend.src_alpha))
                    .dst_alpha_blend_factor(conversions::vk_blend_factor(blend.dst_alpha))
                    .alpha_blend_op(conversions::vk_blend_op(blend.alpha_op))
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = key.color_formats.iter().map(|format| conversions::vk_format(*format)).collect_vec();
        let depth_format = key.depth_format.map_or(vk::Format::UNDEFINED, conversions::vk_format);
        let stencil_format = if has_stencil { depth_format } else { vk::Format::UNDEFINED };
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.ash_device
                .create_graphics_pipelines(self.pipeline_cache, std::slice::from_ref(&pipeline_ci), None)
                .map_err(|(_, e)| log_err(RhiError::from(e)))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| log_err(RhiError::backend("vkCreateGraphicsPipelines returned no pipeline")))?;
        log::debug!("created graphics pipeline {:?} for {:?}", pipeline, key);
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::object::RhiObject;

    fn key(vertex_shader: ShaderHandle, pixel_shader: Option<ShaderHandle>) -> PipelineKey {
        PipelineKey {
            vertex_shader,
            pixel_shader,
            input_layout: RhiObject::new("layout").id(),
            depth_stencil_state: None,
            blend_state: None,
            rasterizer_state: None,
            topology: PrimitiveTopology::default(),
            color_formats: vec![Format::R8G8B8A8Unorm],
            depth_format: None,
        }
    }

    #[test]
    fn test_recreated_module_does_not_match_old_key() {
        let mut shaders = SlotMap::<ShaderHandle, ()>::with_key();
        let old_vs = shaders.insert(());
        let ps = shaders.insert(());
        let cached = key(old_vs, Some(ps));
        assert!(cached.uses_shader(old_vs));
        assert!(cached.uses_shader(ps));

        // slot 被复用后代数不同
        shaders.remove(old_vs);
        let new_vs = shaders.insert(());
        assert_ne!(old_vs, new_vs);
        assert!(!cached.uses_shader(new_vs));
        assert_ne!(key(new_vs, Some(ps)).vertex_shader, cached.vertex_shader);
    }
}

use std::mem::offset_of;

use crate::types::{Format, IndexFormat};

/// input layout 中的一个顶点属性
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputElement {
    /// HLSL 风格的语义名，例如 POSITION、TEXCOORD
    pub semantic: String,
    pub location: u32,
    pub format: Format,
    pub offset: u32,
}

impl InputElement {
    /// 超出 u32 的 offset 会饱和为 `u32::MAX`，由 InputLayout 的校验拒绝
    pub fn new(semantic: impl Into<String>, location: u32, format: Format, offset: usize) -> Self {
        Self {
            semantic: semantic.into(),
            location,
            format,
            offset: u32::try_from(offset).unwrap_or(u32::MAX),
        }
    }
}

/// 单个 vertex buffer binding 的布局
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputLayoutDesc {
    pub stride: u32,
    pub elements: Vec<InputElement>,
}

/// 可以直接上传到 vertex buffer 的顶点类型
pub trait VertexLayout: bytemuck::Pod {
    fn input_layout() -> InputLayoutDesc;
}

#[repr(C)]
#[derive(Clone, Debug, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPosCol {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl VertexLayout for VertexPosCol {
    fn input_layout() -> InputLayoutDesc {
        InputLayoutDesc {
            stride: size_of::<Self>() as u32,
            elements: vec![
                InputElement::new("POSITION", 0, Format::R32G32B32Float, offset_of!(Self, position)),
                InputElement::new("COLOR", 1, Format::R32G32B32A32Float, offset_of!(Self, color)),
            ],
        }
    }
}

#[repr(C)]
#[derive(Clone, Debug, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPosUv {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl VertexLayout for VertexPosUv {
    fn input_layout() -> InputLayoutDesc {
        InputLayoutDesc {
            stride: size_of::<Self>() as u32,
            elements: vec![
                InputElement::new("POSITION", 0, Format::R32G32B32Float, offset_of!(Self, position)),
                InputElement::new("TEXCOORD", 1, Format::R32G32Float, offset_of!(Self, uv)),
            ],
        }
    }
}

/// 带法线和切线的顶点，用于常规的网格渲染
#[repr(C)]
#[derive(Clone, Debug, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPosUvNorTan {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

impl VertexLayout for VertexPosUvNorTan {
    fn input_layout() -> InputLayoutDesc {
        InputLayoutDesc {
            stride: size_of::<Self>() as u32,
            elements: vec![
                // positions
                InputElement::new("POSITION", 0, Format::R32G32B32Float, offset_of!(Self, position)),
                // uvs
                InputElement::new("TEXCOORD", 1, Format::R32G32Float, offset_of!(Self, uv)),
                // normals
                InputElement::new("NORMAL", 2, Format::R32G32B32Float, offset_of!(Self, normal)),
                // tangents
                InputElement::new("TANGENT", 3, Format::R32G32B32Float, offset_of!(Self, tangent)),
            ],
        }
    }
}

/// index buffer 中元素的类型
pub trait IndexType: bytemuck::Pod {
    const FORMAT: IndexFormat;
}

impl IndexType for u16 {
    const FORMAT: IndexFormat = IndexFormat::U16;
}

impl IndexType for u32 {
    const FORMAT: IndexFormat = IndexFormat::U32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_uv_nor_tan_layout() {
        let layout = VertexPosUvNorTan::input_layout();
        assert_eq!(layout.stride, 44);
        assert_eq!(layout.elements.len(), 4);
        assert_eq!(layout.elements[2].semantic, "NORMAL");
        assert_eq!(layout.elements[2].offset, 20);
    }

    #[test]
    fn test_index_formats() {
        assert_eq!(<u16 as IndexType>::FORMAT.stride(), 2);
        assert_eq!(<u32 as IndexType>::FORMAT.stride(), 4);
    }
}

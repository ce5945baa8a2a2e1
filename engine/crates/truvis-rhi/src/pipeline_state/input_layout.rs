use std::collections::HashSet;
use std::rc::Rc;

use crate::device::Device;
use crate::error::{RhiError, RhiResult, log_err};
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::vertex::{InputLayoutDesc, VertexLayout};

pub struct InputLayout {
    object: RhiObject,
    desc: InputLayoutDesc,
    device: Rc<Device>,
}

impl DebugType for InputLayout {
    fn debug_type_name() -> &'static str {
        "InputLayout"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl InputLayout {
    pub fn new(device: &Rc<Device>, desc: InputLayoutDesc, name: impl AsRef<str>) -> RhiResult<Self> {
        device.check_ready("create input layout")?;
        Self::validate(&desc).map_err(log_err)?;

        Ok(Self {
            object: RhiObject::new(name),
            desc,
            device: device.clone(),
        })
    }

    /// 直接使用顶点类型自带的布局
    #[inline]
    pub fn from_vertex<V: VertexLayout>(device: &Rc<Device>) -> RhiResult<Self> {
        Self::new(device, V::input_layout(), std::any::type_name::<V>())
    }

    fn validate(desc: &InputLayoutDesc) -> RhiResult<()> {
        if desc.elements.is_empty() {
            return Err(RhiError::invalid_parameter("input layout has no elements"));
        }
        if desc.stride == 0 {
            return Err(RhiError::invalid_parameter("input layout stride is zero"));
        }

        let mut locations = HashSet::new();
        for element in &desc.elements {
            if element.format.is_depth() {
                return Err(RhiError::invalid_parameter(format!(
                    "vertex attribute {} uses depth format {:?}",
                    element.semantic, element.format
                )));
            }
            let end = element.offset.checked_add(element.format.bytes_per_pixel());
            if end.is_none_or(|end| end > desc.stride) {
                return Err(RhiError::invalid_parameter(format!(
                    "vertex attribute {} overflows the vertex stride {}",
                    element.semantic, desc.stride
                )));
            }
            if !locations.insert(element.location) {
                return Err(RhiError::invalid_parameter(format!(
                    "vertex attribute location {} is used twice",
                    element.location
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn desc(&self) -> &InputLayoutDesc {
        &self.desc
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Format;
    use crate::vertex::{InputElement, VertexPosCol};

    #[test]
    fn test_validate_vertex_layouts() {
        assert!(InputLayout::validate(&VertexPosCol::input_layout()).is_ok());
    }

    #[test]
    fn test_reject_overflow_and_duplicate_locations() {
        let overflow = InputLayoutDesc {
            stride: 8,
            elements: vec![InputElement::new("POSITION", 0, Format::R32G32B32Float, 0)],
        };
        assert!(matches!(InputLayout::validate(&overflow), Err(RhiError::InvalidParameter(_))));

        let huge_offset = InputLayoutDesc {
            stride: 12,
            elements: vec![InputElement::new("POSITION", 0, Format::R32G32B32Float, u32::MAX as usize - 2)],
        };
        assert!(matches!(InputLayout::validate(&huge_offset), Err(RhiError::InvalidParameter(_))));

        let truncated = InputLayoutDesc {
            stride: 12,
            elements: vec![InputElement::new("POSITION", 0, Format::R32G32B32Float, usize::MAX)],
        };
        assert!(matches!(InputLayout::validate(&truncated), Err(RhiError::InvalidParameter(_))));

        let duplicate = InputLayoutDesc {
            stride: 24,
            elements: vec![
                InputElement::new("POSITION", 0, Format::R32G32B32Float, 0),
                InputElement::new("NORMAL", 0, Format::R32G32B32Float, 12),
            ],
        };
        assert!(InputLayout::validate(&duplicate).is_err());

        let empty = InputLayoutDesc {
            stride: 12,
            elements: vec![],
        };
        assert!(InputLayout::validate(&empty).is_err());
    }
}

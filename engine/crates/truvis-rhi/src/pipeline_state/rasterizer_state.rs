use std::rc::Rc;

use crate::device::Device;
use crate::error::{RhiError, RhiResult, log_err};
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::types::{CullMode, FillMode};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerDesc {
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
    /// 顺时针为正面
    pub front_clockwise: bool,
    pub depth_clip: bool,
    pub depth_bias: f32,
    pub line_width: f32,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            fill_mode: FillMode::Solid,
            front_clockwise: true,
            depth_clip: true,
            depth_bias: 0.0,
            line_width: 1.0,
        }
    }
}

pub struct RasterizerState {
    object: RhiObject,
    desc: RasterizerDesc,
    device: Rc<Device>,
}

impl DebugType for RasterizerState {
    fn debug_type_name() -> &'static str {
        "RasterizerState"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl RasterizerState {
    pub fn new(device: &Rc<Device>, desc: RasterizerDesc) -> RhiResult<Self> {
        device.check_ready("create rasterizer state")?;
        if desc.line_width.is_nan() || desc.line_width <= 0.0 {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "rasterizer line width must be positive, got {}",
                desc.line_width
            ))));
        }

        Ok(Self {
            object: RhiObject::new(format!("{:?}-{:?}", desc.cull_mode, desc.fill_mode)),
            desc,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn desc(&self) -> &RasterizerDesc {
        &self.desc
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }
}

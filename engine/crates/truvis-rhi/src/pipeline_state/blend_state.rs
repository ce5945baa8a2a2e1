use std::rc::Rc;

use crate::device::Device;
use crate::error::RhiResult;
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::types::{BlendFactor, BlendOperation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOperation,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOperation,
}

impl BlendDesc {
    /// 开启时为标准的 alpha blend
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::InvSrcAlpha,
            color_op: BlendOperation::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOperation::Add,
        }
    }
}

pub struct BlendState {
    object: RhiObject,
    desc: BlendDesc,
    device: Rc<Device>,
}

impl DebugType for BlendState {
    fn debug_type_name() -> &'static str {
        "BlendState"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl BlendState {
    pub fn new(device: &Rc<Device>, blend_enabled: bool) -> RhiResult<Self> {
        Self::with_desc(device, BlendDesc::new(blend_enabled))
    }

    pub fn with_desc(device: &Rc<Device>, desc: BlendDesc) -> RhiResult<Self> {
        device.check_ready("create blend state")?;
        Ok(Self {
            object: RhiObject::new(if desc.enabled { "blend-on" } else { "blend-off" }),
            desc,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn desc(&self) -> &BlendDesc {
        &self.desc
    }

    #[inline]
    pub fn blend_enabled(&self) -> bool {
        self.desc.enabled
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }
}

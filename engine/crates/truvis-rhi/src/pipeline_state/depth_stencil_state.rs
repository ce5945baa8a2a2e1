use std::rc::Rc;

use crate::device::Device;
use crate::error::RhiResult;
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::types::CompareFunction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub stencil_test: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
}

impl DepthStencilDesc {
    /// depth test 开启时使用 LessEqual，并写入深度
    pub fn new(depth_enabled: bool) -> Self {
        Self {
            depth_test: depth_enabled,
            depth_write: depth_enabled,
            depth_compare: CompareFunction::LessEqual,
            stencil_test: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
        }
    }
}

pub struct DepthStencilState {
    object: RhiObject,
    desc: DepthStencilDesc,
    device: Rc<Device>,
}

impl DebugType for DepthStencilState {
    fn debug_type_name() -> &'static str {
        "DepthStencilState"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl DepthStencilState {
    pub fn new(device: &Rc<Device>, depth_enabled: bool) -> RhiResult<Self> {
        Self::with_desc(device, DepthStencilDesc::new(depth_enabled))
    }

    pub fn with_desc(device: &Rc<Device>, desc: DepthStencilDesc) -> RhiResult<Self> {
        device.check_ready("create depth stencil state")?;
        Ok(Self {
            object: RhiObject::new(if desc.depth_test { "depth-on" } else { "depth-off" }),
            desc,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn desc(&self) -> &DepthStencilDesc {
        &self.desc
    }

    #[inline]
    pub fn depth_enabled(&self) -> bool {
        self.desc.depth_test
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }
}

use std::rc::Rc;

use crate::device::{BoundTexture, Device};
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::TextureHandle;
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::types::{Format, TextureDesc};

/// 可以作为 color attachment / depth stencil attachment，也可以被 shader 采样的 2D 纹理
pub struct RenderTarget {
    object: RhiObject,
    handle: TextureHandle,
    desc: TextureDesc,
    device: Rc<Device>,
}

impl DebugType for RenderTarget {
    fn debug_type_name() -> &'static str {
        "RenderTarget"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        let handle = self.handle;
        self.device.release_object(self.object.id(), |backend| backend.destroy_texture(handle));
    }
}

impl RenderTarget {
    /// format 为深度格式时得到的是 depth stencil target
    pub fn new(device: &Rc<Device>, width: u32, height: u32, format: Format, name: impl AsRef<str>) -> RhiResult<Self> {
        device.check_ready("create render target")?;
        if width == 0 || height == 0 {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "render target {} has zero size {}x{}",
                name.as_ref(),
                width,
                height
            ))));
        }

        let object = RhiObject::new(name);
        let desc = TextureDesc { width, height, format };
        let debug_name = format!("{}::{}", Self::debug_type_name(), object.name());
        let handle = device.with_backend("create render target", |backend| backend.create_texture(&desc, &debug_name))?;

        Ok(Self {
            object,
            handle,
            desc,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.object.name()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.desc.format
    }

    #[inline]
    pub(crate) fn handle(&self) -> TextureHandle {
        self.handle
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }

    pub(crate) fn bound(&self) -> BoundTexture {
        BoundTexture {
            id: self.object.id(),
            handle: self.handle,
            format: self.desc.format,
            width: self.desc.width,
            height: self.desc.height,
        }
    }
}

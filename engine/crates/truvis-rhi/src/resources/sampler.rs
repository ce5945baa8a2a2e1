use std::rc::Rc;

use crate::device::{BoundSampler, Device};
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::SamplerHandle;
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::types::SamplerDesc;

pub struct Sampler {
    object: RhiObject,
    handle: SamplerHandle,
    desc: SamplerDesc,
    device: Rc<Device>,
}

impl DebugType for Sampler {
    fn debug_type_name() -> &'static str {
        "Sampler"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        let handle = self.handle;
        self.device.release_object(self.object.id(), |backend| backend.destroy_sampler(handle));
    }
}

impl Sampler {
    pub fn new(device: &Rc<Device>, desc: SamplerDesc, name: impl AsRef<str>) -> RhiResult<Self> {
        device.check_ready("create sampler")?;
        if let Some(anisotropy) = desc.max_anisotropy {
            if !(1.0..=16.0).contains(&anisotropy) {
                return Err(log_err(RhiError::invalid_parameter(format!(
                    "sampler anisotropy must be in [1, 16], got {}",
                    anisotropy
                ))));
            }
        }

        let object = RhiObject::new(name);
        let debug_name = format!("{}::{}", Self::debug_type_name(), object.name());
        let handle = device.with_backend("create sampler", |backend| backend.create_sampler(&desc, &debug_name))?;

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
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }

    pub(crate) fn bound(&self) -> BoundSampler {
        BoundSampler {
            id: self.object.id(),
            handle: self.handle,
        }
    }
}

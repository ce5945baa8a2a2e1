use std::rc::Rc;

use crate::device::Device;
use crate::error::RhiResult;
use crate::resources::{GpuBuffer, impl_derive_buffer};
use crate::types::{BufferKind, BufferUsage};

/// shader 的 uniform 参数，每帧由 CPU 更新
pub struct ConstantBuffer {
    inner: GpuBuffer,
}

impl_derive_buffer!(ConstantBuffer, GpuBuffer, inner);

impl ConstantBuffer {
    pub fn new(device: &Rc<Device>, size: u32, name: impl AsRef<str>) -> RhiResult<Self> {
        let mut inner = GpuBuffer::new(device, BufferKind::Constant, "ConstantBuffer", name);
        inner.allocate(size, 1, BufferUsage::Dynamic, None)?;
        Ok(Self { inner })
    }

    /// 以 T 为布局的 constant buffer
    #[inline]
    pub fn new_for<T: bytemuck::Pod>(device: &Rc<Device>, name: impl AsRef<str>) -> RhiResult<Self> {
        Self::new(device, size_of::<T>() as u32, name)
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.inner.stride()
    }
}

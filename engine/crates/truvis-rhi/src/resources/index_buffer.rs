use std::rc::Rc;

use crate::device::Device;
use crate::error::{RhiError, RhiResult, log_err};
use crate::resources::{GpuBuffer, impl_derive_buffer};
use crate::types::{BufferKind, BufferUsage, IndexFormat};
use crate::vertex::IndexType;

pub struct IndexBuffer {
    inner: GpuBuffer,
    format: IndexFormat,
}

impl_derive_buffer!(IndexBuffer, GpuBuffer, inner);

impl IndexBuffer {
    pub fn new(device: &Rc<Device>, name: impl AsRef<str>) -> Self {
        Self {
            inner: GpuBuffer::new(device, BufferKind::Index, "IndexBuffer", name),
            format: IndexFormat::U32,
        }
    }

    /// 分配内存并上传 u16 或 u32 的 index
    pub fn create<I: IndexType>(&mut self, indices: &[I]) -> RhiResult<()> {
        if indices.is_empty() {
            return Err(log_err(RhiError::invalid_parameter("index buffer created from an empty index list")));
        }
        self.inner.allocate(
            I::FORMAT.stride(),
            indices.len() as u32,
            BufferUsage::Static,
            Some(bytemuck::cast_slice(indices)),
        )?;
        self.format = I::FORMAT;
        Ok(())
    }

    pub fn create_dynamic(&mut self, format: IndexFormat, index_count: u32) -> RhiResult<()> {
        self.inner.allocate(format.stride(), index_count, BufferUsage::Dynamic, None)?;
        self.format = format;
        Ok(())
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.inner.count()
    }

    #[inline]
    pub fn index_format(&self) -> IndexFormat {
        self.format
    }
}

use std::rc::Rc;

use crate::device::Device;
use crate::error::{RhiError, RhiResult, log_err};
use crate::resources::{GpuBuffer, impl_derive_buffer};
use crate::types::{BufferKind, BufferUsage};
use crate::vertex::VertexLayout;

pub struct VertexBuffer {
    inner: GpuBuffer,
}

impl_derive_buffer!(VertexBuffer, GpuBuffer, inner);

impl VertexBuffer {
    pub fn new(device: &Rc<Device>, name: impl AsRef<str>) -> Self {
        Self {
            inner: GpuBuffer::new(device, BufferKind::Vertex, "VertexBuffer", name),
        }
    }

    /// 分配内存并上传顶点数据
    pub fn create<V: VertexLayout>(&mut self, vertices: &[V]) -> RhiResult<()> {
        if vertices.is_empty() {
            return Err(log_err(RhiError::invalid_parameter("vertex buffer created from an empty vertex list")));
        }
        self.inner.allocate(
            size_of::<V>() as u32,
            vertices.len() as u32,
            BufferUsage::Static,
            Some(bytemuck::cast_slice(vertices)),
        )
    }

    /// 分配可以每帧由 CPU 写入的内存，不写入初始内容
    pub fn create_dynamic(&mut self, stride: u32, vertex_count: u32) -> RhiResult<()> {
        self.inner.allocate(stride, vertex_count, BufferUsage::Dynamic, None)
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.inner.count()
    }
}

use std::cell::Cell;
use std::rc::Rc;

use crate::backend::MappedMemory;
use crate::device::{BoundBuffer, Device};
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::BufferHandle;
use crate::object::{ObjectId, RhiObject};
use crate::types::{BufferDesc, BufferKind, BufferUsage};

/// vertex / index / constant buffer 共用的部分
///
/// `stride × count` 字节的 GPU 内存；同一时间最多存在一个 [`BufferMapping`]
pub struct GpuBuffer {
    object: RhiObject,
    /// 用于日志，例如 VertexBuffer
    type_name: &'static str,
    device: Rc<Device>,

    handle: Option<BufferHandle>,
    kind: BufferKind,
    usage: BufferUsage,
    stride: u32,
    count: u32,

    mapped: Cell<bool>,
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

// init & destroy
impl GpuBuffer {
    pub(crate) fn new(device: &Rc<Device>, kind: BufferKind, type_name: &'static str, name: impl AsRef<str>) -> Self {
        Self {
            object: RhiObject::new(name),
            type_name,
            device: device.clone(),
            handle: None,
            kind,
            usage: BufferUsage::Static,
            stride: 0,
            count: 0,
            mapped: Cell::new(false),
        }
    }

    /// 分配 `stride × count` 字节，有 data 时写入初始内容
    ///
    /// 重复调用会释放之前的内存
    pub(crate) fn allocate(
        &mut self,
        stride: u32,
        count: u32,
        usage: BufferUsage,
        data: Option<&[u8]>,
    ) -> RhiResult<()> {
        let what = format!("create {}", self.label());
        self.device.check_ready(&what)?;
        if stride == 0 || count == 0 {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{}: stride ({}) and count ({}) must be non-zero",
                what, stride, count
            ))));
        }
        let size = stride as u64 * count as u64;
        if let Some(data) = data {
            if data.len() as u64 != size {
                return Err(log_err(RhiError::invalid_parameter(format!(
                    "{}: {} bytes of data for a {} byte buffer",
                    what,
                    data.len(),
                    size
                ))));
            }
        }

        self.release();

        let desc = BufferDesc {
            size,
            stride,
            kind: self.kind,
            usage,
        };
        let name = self.label();
        let handle = self.device.with_backend(&what, |backend| backend.create_buffer(&desc, &name))?;
        self.handle = Some(handle);
        self.usage = usage;
        self.stride = stride;
        self.count = count;

        if let Some(data) = data {
            let upload = |buffer: &GpuBuffer| -> RhiResult<()> {
                let mut mapping = buffer.map()?;
                mapping.write(0, data)?;
                mapping.unmap()
            };
            if let Err(err) = upload(&*self) {
                self.release();
                return Err(err);
            }
        }

        log::debug!("created {} ({} bytes)", self.label(), size);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.release_object(self.object.id(), |backend| backend.destroy_buffer(handle));
        }
        self.stride = 0;
        self.count = 0;
    }
}

// getter
impl GpuBuffer {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.object.name()
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// 占用的字节数
    #[inline]
    pub fn memory_usage(&self) -> u64 {
        self.stride as u64 * self.count as u64
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    #[inline]
    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped.get()
    }

    #[inline]
    pub(crate) fn rhi_object(&self) -> &RhiObject {
        &self.object
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }

    #[inline]
    fn label(&self) -> String {
        format!("{}::{}", self.type_name, self.object.name())
    }

    pub(crate) fn bound(&self) -> RhiResult<BoundBuffer> {
        let handle = self
            .handle
            .ok_or_else(|| log_err(RhiError::not_initialized(format!("{} was never created", self.label()))))?;
        Ok(BoundBuffer {
            id: self.object.id(),
            handle,
            stride: self.stride,
            count: self.count,
            size: self.memory_usage(),
        })
    }
}

// map & unmap
impl GpuBuffer {
    /// 获得 CPU 可写的内存
    ///
    /// buffer 未创建、已经处于 map 状态，或者后端 map 失败时返回错误
    pub fn map(&self) -> RhiResult<BufferMapping<'_>> {
        let handle = self
            .handle
            .ok_or_else(|| log_err(RhiError::not_initialized(format!("{} was never created", self.label()))))?;
        if self.mapped.get() {
            return Err(log_err(RhiError::AlreadyMapped(self.label())));
        }

        let memory = self.device.with_backend("map buffer", |backend| backend.map_buffer(handle))?;
        self.mapped.set(true);

        Ok(BufferMapping {
            buffer: self,
            handle,
            len: memory.len.min(self.memory_usage() as usize),
            memory,
            finished: false,
        })
    }

    fn finish_unmap(&self, handle: BufferHandle) -> RhiResult<()> {
        self.mapped.set(false);
        self.device.with_backend("unmap buffer", |backend| backend.unmap_buffer(handle))
    }
}

/// map 得到的内存，unmap 或者 drop 之后失效
pub struct BufferMapping<'a> {
    buffer: &'a GpuBuffer,
    handle: BufferHandle,
    memory: MappedMemory,
    len: usize,
    finished: bool,
}

impl Drop for BufferMapping<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // 错误已经在 with_backend 中打印
            let _ = self.buffer.finish_unmap(self.handle);
        }
    }
}

impl BufferMapping<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: 指针在 unmap 之前有效，并且 GpuBuffer 的 mapped 标记保证了只有这一个 mapping
        unsafe { std::slice::from_raw_parts(self.memory.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: 同 as_slice，&mut self 保证了独占
        unsafe { std::slice::from_raw_parts_mut(self.memory.ptr.as_ptr(), self.len) }
    }

    /// 从 offset 开始写入 data
    pub fn write(&mut self, offset: usize, data: &[u8]) -> RhiResult<()> {
        let end = offset.checked_add(data.len()).filter(|end| *end <= self.len).ok_or_else(|| {
            log_err(RhiError::invalid_parameter(format!(
                "write of {} bytes at offset {} into a {} byte mapping",
                data.len(),
                offset,
                self.len
            )))
        })?;
        self.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: usize, data: &[T]) -> RhiResult<()> {
        self.write(offset, bytemuck::cast_slice(data))
    }

    /// 读取 offset 处的一个 T，不要求对齐
    pub fn read_pod<T: bytemuck::Pod>(&self, offset: usize) -> RhiResult<T> {
        let bytes = offset
            .checked_add(size_of::<T>())
            .filter(|end| *end <= self.len)
            .map(|end| &self.as_slice()[offset..end])
            .ok_or_else(|| log_err(RhiError::invalid_parameter("read out of the mapped range")))?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// 刷新并结束 mapping
    pub fn unmap(mut self) -> RhiResult<()> {
        self.finished = true;
        self.buffer.finish_unmap(self.handle)
    }
}

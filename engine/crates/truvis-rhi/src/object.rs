use std::sync::atomic::{AtomicU64, Ordering};

/// 进程内唯一的 RHI 对象 id，从 1 开始递增
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// 所有 GPU 资源封装共享的身份信息：id 以及 debug name
#[derive(Debug)]
pub struct RhiObject {
    id: ObjectId,
    name: String,
}

impl RhiObject {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.as_ref().to_string(),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub trait DebugType {
    fn debug_type_name() -> &'static str;

    fn rhi_object(&self) -> &RhiObject;

    /// 形如 `VertexBuffer::quad`，用于日志以及 native debug name
    fn debug_name(&self) -> String {
        format!("{}::{}", Self::debug_type_name(), self.rhi_object().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique() {
        let a = RhiObject::new("a");
        let b = RhiObject::new("b");
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
    }
}

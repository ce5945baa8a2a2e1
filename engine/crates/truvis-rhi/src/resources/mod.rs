mod buffer;
mod constant_buffer;
mod index_buffer;
mod render_target;
mod sampler;
mod vertex_buffer;

pub use buffer::{BufferMapping, GpuBuffer};
pub use constant_buffer::ConstantBuffer;
pub use index_buffer::IndexBuffer;
pub use render_target::RenderTarget;
pub use sampler::Sampler;
pub use vertex_buffer::VertexBuffer;

/// 为各种派生 buffer 类型实现 Deref、DerefMut 以及 DebugType
macro_rules! impl_derive_buffer {
    ($name:ident, $target:ty, $inner:ident) => {
        impl std::ops::Deref for $name {
            type Target = $target;

            fn deref(&self) -> &Self::Target {
                &self.$inner
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.$inner
            }
        }

        impl crate::object::DebugType for $name {
            fn debug_type_name() -> &'static str {
                stringify!($name)
            }

            fn rhi_object(&self) -> &crate::object::RhiObject {
                self.$inner.rhi_object()
            }
        }
    };
}
pub(crate) use impl_derive_buffer;

use slotmap::new_key_type;

// 后端资源表中的 key，由后端分配，跨后端不通用
new_key_type! {
    /// Buffer Handle Key
    pub struct BufferHandle;
    /// ShaderModule Handle Key
    pub struct ShaderHandle;
    /// Texture (render target / depth stencil) Handle Key
    pub struct TextureHandle;
    /// Sampler Handle Key
    pub struct SamplerHandle;
    /// Query Handle Key
    pub struct QueryHandle;
}

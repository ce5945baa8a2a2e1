use bitflags::bitflags;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use serde::{Deserialize, Serialize};

use crate::error::{RhiError, RhiResult};

/// 颜色统一使用 RGBA 的 Vec4
pub type Color = glam::Vec4;

/// 每个 shader stage 可以绑定的 constant buffer 数量
pub const MAX_CONSTANT_BUFFER_SLOTS: u32 = 8;
/// 可以绑定的 texture 数量
pub const MAX_TEXTURE_SLOTS: u32 = 8;
/// 可以绑定的 sampler 数量
pub const MAX_SAMPLER_SLOTS: u32 = 8;
/// 同时绑定的 render target 数量
pub const MAX_RENDER_TARGETS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// scissor rectangle，单位是像素
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

/// constant buffer 绑定到哪个 shader stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferScope {
    VertexShader,
    PixelShader,
    /// 同时绑定到 vertex shader 和 pixel shader
    Global,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// 单个 GPU 时间戳
    Timestamp,
    /// 包裹一段时间戳查询，给出时钟频率以及结果是否可信
    TimestampDisjoint,
}

/// 后端解析出来的 query 结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueryResult {
    Timestamp(u64),
    Disjoint {
        /// 一个 tick 对应的纳秒数
        period_ns: f32,
        /// 时钟在这段时间内发生了跳变，结果不可用
        disjoint: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    R16G16B16A16Float,
    R32G32B32A32Float,
    R32G32B32Float,
    R32G32Float,
    R32Float,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

impl Format {
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::R8G8B8A8Unorm | Format::B8G8R8A8Unorm => 4,
            Format::R16G16B16A16Float => 8,
            Format::R32G32B32A32Float => 16,
            Format::R32G32B32Float => 12,
            Format::R32G32Float => 8,
            Format::R32Float | Format::D32Float | Format::D24UnormS8Uint => 4,
            Format::D32FloatS8Uint => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    #[inline]
    pub fn stride(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColor,
    InvDstColor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mip_filter: Filter,
    pub address_mode: AddressMode,
    pub compare: Option<CompareFunction>,
    /// None 表示关闭各向异性过滤
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mip_filter: Filter::Linear,
            address_mode: AddressMode::Wrap,
            compare: None,
            max_anisotropy: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

/// buffer 的用途，决定后端的 usage flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
}

/// Static：创建时写入一次；Dynamic：每帧由 CPU 更新
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub stride: u32,
    pub kind: BufferKind,
    pub usage: BufferUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl AdapterType {
    /// 越小越优先；None 表示不可用
    #[inline]
    fn rank(self) -> Option<u32> {
        match self {
            AdapterType::Discrete => Some(0),
            AdapterType::Integrated => Some(1),
            AdapterType::Virtual => Some(2),
            AdapterType::Cpu => Some(3),
            AdapterType::Other => None,
        }
    }
}

/// 一张物理显卡的描述
#[derive(Clone, Debug, PartialEq)]
pub struct AdapterInfo {
    pub name: String,
    pub adapter_type: AdapterType,
    pub vendor_id: u32,
    pub device_id: u32,
    /// 支持 graphics 的 queue family
    pub graphics_queue_family: Option<u32>,
    /// graphics queue family 是否可以 present 到给定的 surface
    pub supports_present: bool,
    /// 一个 timestamp tick 对应的纳秒数
    pub timestamp_period_ns: f32,
}

impl AdapterInfo {
    /// 类型已知，并且有 graphics queue；需要 present 时 graphics queue 还要能 present
    pub fn is_suitable(&self, require_present: bool) -> bool {
        self.adapter_type.rank().is_some()
            && self.graphics_queue_family.is_some()
            && (!require_present || self.supports_present)
    }
}

/// 从所有 adapter 中选出最合适的一个
///
/// 优先级：独立显卡 > 集成显卡 > 虚拟显卡 > CPU，同级别时取枚举顺序靠前的
pub fn select_adapter(adapters: &[AdapterInfo], require_present: bool) -> Option<usize> {
    adapters
        .iter()
        .enumerate()
        .filter(|(_, adapter)| adapter.is_suitable(require_present))
        .filter_map(|(idx, adapter)| adapter.adapter_type.rank().map(|rank| (rank, idx)))
        .min()
        .map(|(_, idx)| idx)
}

/// 平台提供的绘制表面
#[derive(Clone, Copy, Debug)]
pub enum SurfaceHandle {
    /// 不需要 present，例如离屏渲染和测试
    Headless,
    Window {
        display: RawDisplayHandle,
        window: RawWindowHandle,
    },
}

impl SurfaceHandle {
    pub fn from_window(window: &(impl HasDisplayHandle + HasWindowHandle)) -> RhiResult<Self> {
        let display = window
            .display_handle()
            .map_err(|e| RhiError::invalid_parameter(format!("display handle unavailable: {}", e)))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| RhiError::invalid_parameter(format!("window handle unavailable: {}", e)))?
            .as_raw();
        Ok(Self::Window { display, window })
    }

    #[inline]
    pub fn is_headless(&self) -> bool {
        matches!(self, SurfaceHandle::Headless)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, ty: AdapterType, graphics: bool, present: bool) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            adapter_type: ty,
            vendor_id: 0,
            device_id: 0,
            graphics_queue_family: graphics.then_some(0),
            supports_present: present,
            timestamp_period_ns: 1.0,
        }
    }

    #[test]
    fn test_prefer_discrete_gpu() {
        let adapters = vec![
            adapter("cpu", AdapterType::Cpu, true, true),
            adapter("igpu", AdapterType::Integrated, true, true),
            adapter("dgpu", AdapterType::Discrete, true, true),
        ];
        assert_eq!(select_adapter(&adapters, true), Some(2));
    }

    #[test]
    fn test_skip_adapters_without_graphics_queue() {
        let adapters = vec![
            adapter("compute-only", AdapterType::Discrete, false, false),
            adapter("igpu", AdapterType::Integrated, true, true),
        ];
        assert_eq!(select_adapter(&adapters, false), Some(1));
    }

    #[test]
    fn test_present_support_only_required_with_surface() {
        let adapters = vec![adapter("dgpu", AdapterType::Discrete, true, false)];
        assert_eq!(select_adapter(&adapters, true), None);
        assert_eq!(select_adapter(&adapters, false), Some(0));
    }

    #[test]
    fn test_ties_keep_enumeration_order() {
        let adapters = vec![
            adapter("first", AdapterType::Integrated, true, true),
            adapter("second", AdapterType::Integrated, true, true),
            adapter("other", AdapterType::Other, true, true),
        ];
        assert_eq!(select_adapter(&adapters, true), Some(0));
        assert_eq!(select_adapter(&[], true), None);
    }

    #[test]
    fn test_format_traits() {
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(Format::D32Float.is_depth());
        assert!(!Format::D32Float.has_stencil());
        assert!(!Format::R8G8B8A8Unorm.is_depth());
        assert_eq!(Format::R32G32B32Float.bytes_per_pixel(), 12);
    }
}

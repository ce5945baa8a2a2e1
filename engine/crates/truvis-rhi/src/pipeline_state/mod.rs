//! 固定管线状态对象，创建之后不可修改，可以重复绑定

mod blend_state;
mod depth_stencil_state;
mod input_layout;
mod rasterizer_state;

pub use blend_state::{BlendDesc, BlendState};
pub use depth_stencil_state::{DepthStencilDesc, DepthStencilState};
pub use input_layout::InputLayout;
pub use rasterizer_state::{RasterizerDesc, RasterizerState};

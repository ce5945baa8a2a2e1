//! Truvis RHI：与图形 API 无关的 GPU 资源与设备抽象
//!
//! 上层渲染代码只和 [`device::Device`] 以及各种资源封装打交道，
//! 具体的图形 API 由 [`backend::Backend`] 的实现负责。

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod handles;
pub mod object;
pub mod pipeline_state;
pub mod resources;
pub mod settings;
pub mod shader;
pub mod types;
pub mod vertex;

pub use config::{RhiConfig, ValidationMode};
pub use device::{Device, DeviceState};
pub use error::{RhiError, RhiResult};
pub use settings::{Settings, SettingsStore};

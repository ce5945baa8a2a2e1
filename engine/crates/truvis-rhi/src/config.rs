use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// validation layer 的开启方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// debug 构建开启，release 构建关闭
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl ValidationMode {
    #[inline]
    pub fn is_requested(self) -> bool {
        match self {
            ValidationMode::Auto => cfg!(debug_assertions),
            ValidationMode::Enabled => true,
            ValidationMode::Disabled => false,
        }
    }
}

/// RHI 的配置，可以从 toml 文件加载
///
/// ```toml
/// app_name = "demo"
/// backend = "vulkan"
/// validation = "enabled"
/// frames_in_flight = 2
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiConfig {
    pub app_name: String,
    pub engine_name: String,
    pub backend: BackendKind,
    pub validation: ValidationMode,
    /// 同时在 GPU 上执行的帧数
    pub frames_in_flight: u32,
    /// timestamp query pool 的容量
    pub max_queries: u32,
    /// env_logger 的默认过滤规则，RUST_LOG 优先
    pub log_level: String,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            app_name: "Truvis".to_string(),
            engine_name: "Truvis".to_string(),
            backend: BackendKind::default(),
            validation: ValidationMode::Auto,
            frames_in_flight: 2,
            max_queries: 64,
            log_level: "info".to_string(),
        }
    }
}

impl RhiConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse rhi config")?;
        anyhow::ensure!(config.frames_in_flight > 0, "frames_in_flight must be at least 1");
        anyhow::ensure!(config.max_queries > 0, "max_queries must be at least 1");
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = RhiConfig::from_toml_str(
            r#"
            app_name = "probe"
            backend = "headless"
            validation = "disabled"
            "#,
        )
        .unwrap();
        assert_eq!(config.app_name, "probe");
        assert_eq!(config.backend, BackendKind::Headless);
        assert_eq!(config.validation, ValidationMode::Disabled);
        assert_eq!(config.frames_in_flight, 2);
        assert!(!config.validation.is_requested());
    }

    #[test]
    fn test_reject_zero_frames_in_flight() {
        assert!(RhiConfig::from_toml_str("frames_in_flight = 0").is_err());
        assert!(RhiConfig::from_toml_str("backend = \"d3d11\"").is_err());
    }
}

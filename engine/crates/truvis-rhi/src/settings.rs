/// 进程级别的设置存储，RHI 只往里面写入当前使用的图形 API 信息
pub trait SettingsStore {
    fn set_graphics_api_version(&mut self, version: &str);

    fn set_adapter_name(&mut self, _name: &str) {}
}

/// 默认的设置存储
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub graphics_api_version: Option<String>,
    pub adapter_name: Option<String>,
}

impl SettingsStore for Settings {
    fn set_graphics_api_version(&mut self, version: &str) {
        self.graphics_api_version = Some(version.to_string());
    }

    fn set_adapter_name(&mut self, name: &str) {
        self.adapter_name = Some(name.to_string());
    }
}

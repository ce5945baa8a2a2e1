use std::collections::HashMap;
use std::rc::Rc;

use itertools::Itertools;

use crate::device::{BoundShader, Device};
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::ShaderHandle;
use crate::object::{DebugType, ObjectId, RhiObject};
use crate::resources::ConstantBuffer;
use crate::types::ShaderStage;

/// shader 程序：宏定义、可选的 constant buffer，以及后端的 shader module
pub struct Shader {
    object: RhiObject,
    stage: ShaderStage,

    /// 宏名 -> 值，同名的宏后写入的生效
    macros: HashMap<String, String>,

    constant_buffer: Option<ConstantBuffer>,
    /// update_buffer 每次拷贝的字节数
    buffer_size: u32,

    module: Option<ShaderHandle>,
    device: Rc<Device>,
}

impl DebugType for Shader {
    fn debug_type_name() -> &'static str {
        "Shader"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        // 没有 module 时也要从绑定表中移除
        let module = self.module.take();
        self.device.release_object(self.object.id(), |backend| {
            if let Some(module) = module {
                backend.destroy_shader_module(module);
            }
        });
    }
}

// init & destroy
impl Shader {
    pub fn new(device: &Rc<Device>, stage: ShaderStage, name: impl AsRef<str>) -> Self {
        Self {
            object: RhiObject::new(name),
            stage,
            macros: HashMap::new(),
            constant_buffer: None,
            buffer_size: 0,
            module: None,
            device: device.clone(),
        }
    }

    /// 从 SPIR-V 创建后端的 shader module，之前的 module 会被释放
    pub fn create_module(&mut self, spirv: &[u32]) -> RhiResult<()> {
        if spirv.is_empty() {
            return Err(log_err(RhiError::invalid_parameter(format!("{}: empty SPIR-V", self.debug_name()))));
        }

        let name = self.debug_name();
        let stage = self.stage;
        let module = self
            .device
            .with_backend("create shader module", |backend| backend.create_shader_module(stage, spirv, &name))?;

        self.destroy_module();
        self.module = Some(module);
        Ok(())
    }

    /// 从 .spv 文件的字节创建 shader module
    pub fn create_module_from_bytes(&mut self, bytes: &[u8]) -> RhiResult<()> {
        let words = read_spv(bytes).map_err(log_err)?;
        self.create_module(&words)
    }

    fn destroy_module(&mut self) {
        if let Some(module) = self.module.take() {
            self.device.release_object(self.object.id(), |backend| backend.destroy_shader_module(module));
        }
    }
}

/// 字节流转为 SPIR-V words，处理字节序以及对齐
#[cfg(feature = "vulkan")]
fn read_spv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|e| RhiError::invalid_parameter(format!("invalid SPIR-V: {}", e)))
}

#[cfg(not(feature = "vulkan"))]
fn read_spv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(RhiError::invalid_parameter(format!(
            "invalid SPIR-V: length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let mut words = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect_vec();
    // 大端序的文件
    if words[0] == 0x0723_0203u32.swap_bytes() {
        words.iter_mut().for_each(|word| *word = word.swap_bytes());
    }
    Ok(words)
}

// defines
impl Shader {
    /// 插入或者覆盖一个宏定义
    pub fn add_define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.macros.insert(name.into(), value.into());
    }

    /// 等价于 `add_define(name, "1")`
    #[inline]
    pub fn add_define_flag(&mut self, name: impl Into<String>) {
        self.add_define(name, "1");
    }

    #[inline]
    pub fn define(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    /// 按名字排序，保证传给编译器的参数稳定
    pub fn defines(&self) -> Vec<(&str, &str)> {
        self.macros.iter().map(|(k, v)| (k.as_str(), v.as_str())).sorted().collect_vec()
    }
}

// constant buffer
impl Shader {
    /// 创建 shader 独占的 constant buffer
    pub fn create_constant_buffer(&mut self, size: u32) -> RhiResult<()> {
        let buffer = ConstantBuffer::new(&self.device, size, self.object.name())?;
        self.constant_buffer = Some(buffer);
        self.buffer_size = size;
        Ok(())
    }

    /// 将 data 的前 buffer_size 个字节写入 constant buffer
    ///
    /// 不会部分写入：参数不合法或者没有 constant buffer 时不会 map，
    /// map / unmap 的失败会作为整体的失败返回
    pub fn update_buffer(&self, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{}: update_buffer with empty data",
                self.debug_name()
            ))));
        }

        let Some(constant_buffer) = &self.constant_buffer else {
            log::warn!("Uninitialized buffer.");
            return Err(RhiError::not_initialized(format!("{} has no constant buffer", self.debug_name())));
        };

        let size = self.buffer_size as usize;
        if data.len() < size {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{}: update_buffer with {} bytes, the buffer needs {}",
                self.debug_name(),
                data.len(),
                size
            ))));
        }

        let result = constant_buffer.map().and_then(|mut mapping| {
            mapping.write(0, &data[..size])?;
            mapping.unmap()
        });
        if result.is_err() {
            log::error!("Failed to map buffer");
        }
        result
    }

    /// 以 T 的字节写入 constant buffer
    #[inline]
    pub fn update<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.update_buffer(bytemuck::bytes_of(value))
    }
}

// getter
impl Shader {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.object.name()
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    #[inline]
    pub fn constant_buffer(&self) -> Option<&ConstantBuffer> {
        self.constant_buffer.as_ref()
    }

    #[inline]
    pub fn has_module(&self) -> bool {
        self.module.is_some()
    }

    #[inline]
    pub(crate) fn device(&self) -> &Rc<Device> {
        &self.device
    }

    pub(crate) fn bound(&self) -> BoundShader {
        BoundShader {
            id: self.object.id(),
            stage: self.stage,
            module: self.module,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::config::RhiConfig;
    use crate::settings::Settings;
    use crate::types::SurfaceHandle;

    fn headless_device() -> Rc<Device> {
        Device::new(
            Box::new(HeadlessBackend::default()),
            SurfaceHandle::Headless,
            &RhiConfig::default(),
            &mut Settings::default(),
        )
    }

    #[test]
    fn test_redefine_macro_keeps_last_value() {
        let device = headless_device();
        let mut shader = Shader::new(&device, ShaderStage::Pixel, "lit");
        shader.add_define("PASS", "GBUFFER");
        shader.add_define_flag("SHADOWS");
        shader.add_define("PASS", "FORWARD");

        assert_eq!(shader.define("PASS"), Some("FORWARD"));
        assert_eq!(shader.defines(), vec![("PASS", "FORWARD"), ("SHADOWS", "1")]);
    }

    #[test]
    fn test_read_spv_words() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(read_spv(&bytes).unwrap(), vec![0x0723_0203, 0x0001_0000]);
        assert!(read_spv(&bytes[..3]).is_err());
    }
}

mod binding_table;
mod commands;
mod profiling;

pub use binding_table::{
    Binding, BindingTable, BoundBuffer, BoundSampler, BoundShader, BoundState, BoundTexture, DrawCall,
};
pub use profiling::Query;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::backend::{Backend, InstanceDesc, create_backend};
use crate::config::RhiConfig;
use crate::error::{RhiError, RhiResult, log_err};
use crate::object::{ObjectId, RhiObject};
use crate::settings::SettingsStore;
use crate::types::{AdapterInfo, SurfaceHandle, select_adapter};

/// Device 初始化的状态机
///
/// Uninitialized -> InstanceCreated -> (DebugCallbackInstalled) -> DeviceSelected -> Ready，
/// 任何一步失败都会进入 Failed，不会重试
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    InstanceCreated,
    DebugCallbackInstalled,
    DeviceSelected,
    Ready,
    Failed,
}

/// 初始化成功之后得到的信息
struct InitOutcome {
    adapter: AdapterInfo,
    validation_enabled: bool,
    debug_messenger_installed: bool,
}

/// RHI 的核心：持有后端，所有的状态修改和 draw 都经过 Device
///
/// 只能在一个线程中使用；所有资源都持有 `Rc<Device>`，因此 Device 一定比资源活得久。
pub struct Device {
    object: RhiObject,
    backend: RefCell<Box<dyn Backend>>,
    state: DeviceState,

    adapter: Option<AdapterInfo>,
    api_version: Option<String>,
    validation_enabled: bool,
    debug_messenger_installed: bool,

    /// 当前帧的绑定状态
    bindings: RefCell<BindingTable>,
    /// 尚未关闭的 debug event 数量
    event_depth: Cell<u32>,
    frame_active: Cell<bool>,
    frame_count: Cell<u64>,
}

// init & destroy
impl Device {
    /// 创建 Device，并完成后端的初始化
    ///
    /// 初始化失败不会返回错误，而是得到一个永久不可用的 Device：
    /// `is_initialized()` 为 false，之后的所有调用都返回 [`RhiError::NotInitialized`]
    pub fn new(
        backend: Box<dyn Backend>,
        surface: SurfaceHandle,
        config: &RhiConfig,
        settings: &mut dyn SettingsStore,
    ) -> Rc<Self> {
        let mut device = Self {
            object: RhiObject::new(&config.app_name),
            backend: RefCell::new(backend),
            state: DeviceState::Uninitialized,
            adapter: None,
            api_version: None,
            validation_enabled: false,
            debug_messenger_installed: false,
            bindings: RefCell::new(BindingTable::default()),
            event_depth: Cell::new(0),
            frame_active: Cell::new(false),
            frame_count: Cell::new(0),
        };

        let backend = device.backend.get_mut();
        match Self::initialize(backend.as_mut(), &mut device.state, surface, config) {
            Ok(outcome) => {
                let version = backend.api_version();
                log::info!("{:?} backend ready, graphics api version: {}", backend.kind(), version);
                log::info!("selected adapter: {} ({:?})", outcome.adapter.name, outcome.adapter.adapter_type);
                settings.set_graphics_api_version(&version);
                settings.set_adapter_name(&outcome.adapter.name);

                device.adapter = Some(outcome.adapter);
                device.api_version = Some(version);
                device.validation_enabled = outcome.validation_enabled;
                device.debug_messenger_installed = outcome.debug_messenger_installed;
                device.state = DeviceState::Ready;
            }
            Err(err) => {
                log::error!("Device initialization failed in state {:?}: {}", device.state, err);
                device.state = DeviceState::Failed;
                backend.shutdown();
            }
        }

        Rc::new(device)
    }

    /// 根据配置创建后端，然后创建 Device
    pub fn from_config(
        config: &RhiConfig,
        surface: SurfaceHandle,
        settings: &mut dyn SettingsStore,
    ) -> RhiResult<Rc<Self>> {
        let backend = create_backend(config.backend).map_err(log_err)?;
        Ok(Self::new(backend, surface, config, settings))
    }

    fn initialize(
        backend: &mut dyn Backend,
        state: &mut DeviceState,
        surface: SurfaceHandle,
        config: &RhiConfig,
    ) -> RhiResult<InitOutcome> {
        // validation layer
        let mut enable_validation = config.validation.is_requested();
        if enable_validation && !backend.validation_layers_available() {
            log::warn!("Validation layer was requested, but not available.");
            enable_validation = false;
        }

        // instance
        backend
            .create_instance(&InstanceDesc {
                app_name: config.app_name.clone(),
                engine_name: config.engine_name.clone(),
                enable_validation,
                surface,
                frames_in_flight: config.frames_in_flight.max(1),
                max_queries: config.max_queries.max(1),
            })
            .inspect_err(|_| log::error!("Failed to create instance."))?;
        *state = DeviceState::InstanceCreated;

        // debug callback，失败不影响初始化
        let mut debug_messenger_installed = false;
        if enable_validation {
            match backend.install_debug_messenger() {
                Ok(()) => {
                    debug_messenger_installed = true;
                    *state = DeviceState::DebugCallbackInstalled;
                }
                Err(err) => log::error!("Failed to setup debug callback: {}", err),
            }
        }

        // physical device
        let adapters = backend.enumerate_adapters()?;
        if adapters.is_empty() {
            return Err(RhiError::backend("Failed to enumerate physical devices."));
        }
        for adapter in &adapters {
            log::info!("found adapter: {} ({:?})", adapter.name, adapter.adapter_type);
        }
        let adapter_index = select_adapter(&adapters, !surface.is_headless())
            .ok_or_else(|| RhiError::backend("Failed to find a suitable device."))?;
        *state = DeviceState::DeviceSelected;

        backend.create_device(adapter_index)?;

        Ok(InitOutcome {
            adapter: adapters[adapter_index].clone(),
            validation_enabled: enable_validation,
            debug_messenger_installed,
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // 初始化失败时已经 shutdown 过了
        if self.state == DeviceState::Ready {
            log::info!("Destroying Device");
            if self.event_depth.get() > 0 {
                log::warn!("device destroyed with {} open debug event(s)", self.event_depth.get());
            }
            self.backend.get_mut().shutdown();
        }
    }
}

// getter
impl Device {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    #[inline]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state == DeviceState::Ready
    }

    #[inline]
    pub fn adapter_info(&self) -> Option<&AdapterInfo> {
        self.adapter.as_ref()
    }

    /// 初始化成功后的图形 API 版本号
    #[inline]
    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    #[inline]
    pub fn debug_messenger_installed(&self) -> bool {
        self.debug_messenger_installed
    }

    /// 已经提交的帧数
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count.get()
    }

    #[inline]
    pub fn event_depth(&self) -> u32 {
        self.event_depth.get()
    }

    /// 当前绑定表的快照
    pub fn bindings(&self) -> BindingTable {
        self.bindings.borrow().clone()
    }
}

// tools
impl Device {
    /// 设备不可用时返回错误，不会访问后端
    pub(crate) fn check_ready(&self, what: &str) -> RhiResult<()> {
        if self.state == DeviceState::Ready {
            Ok(())
        } else {
            Err(log_err(RhiError::not_initialized(format!("{}: device is not initialized", what))))
        }
    }

    /// 资源必须来自当前 Device
    pub(crate) fn check_owner(&self, owner: &Rc<Device>, what: &str) -> RhiResult<()> {
        if std::ptr::eq(Rc::as_ptr(owner), self) {
            Ok(())
        } else {
            Err(log_err(RhiError::invalid_parameter(format!("{} belongs to another device", what))))
        }
    }

    /// 在设备可用时访问后端，错误会在这里打印
    pub(crate) fn with_backend<R>(
        &self,
        what: &str,
        f: impl FnOnce(&mut dyn Backend) -> RhiResult<R>,
    ) -> RhiResult<R> {
        self.check_ready(what)?;
        let mut backend = self.backend.borrow_mut();
        f(backend.as_mut()).map_err(|err| {
            log::error!("{} failed: {}", what, err);
            err
        })
    }

    /// 资源销毁时调用：从绑定表中移除，并释放后端对象
    pub(crate) fn release_object(&self, id: ObjectId, f: impl FnOnce(&mut dyn Backend)) {
        self.bindings.borrow_mut().forget(id);
        if self.state == DeviceState::Ready {
            f(self.backend.borrow_mut().as_mut());
        }
    }

    /// 命令需要处于一帧之中，没有显式 frame_begin 时隐式开始一帧
    fn ensure_frame(&self, backend: &mut dyn Backend) -> RhiResult<()> {
        if !self.frame_active.get() {
            backend.begin_frame()?;
            self.frame_active.set(true);
        }
        Ok(())
    }
}

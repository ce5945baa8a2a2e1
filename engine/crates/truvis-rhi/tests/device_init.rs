use std::rc::Rc;

use truvis_rhi::backend::headless::{CommandRecorder, HeadlessBackend, HeadlessBackendDesc, RecordedCommand};
use truvis_rhi::device::Binding;
use truvis_rhi::pipeline_state::InputLayout;
use truvis_rhi::resources::{RenderTarget, VertexBuffer};
use truvis_rhi::shader::Shader;
use truvis_rhi::types::{AdapterInfo, AdapterType, Format, ShaderStage, SurfaceHandle, Viewport};
use truvis_rhi::vertex::VertexPosCol;
use truvis_rhi::{Device, DeviceState, RhiConfig, RhiError, Settings, ValidationMode};

/// 只有头部的 SPIR-V，headless 后端只检查 magic number
const SPIRV_HEADER: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

fn headless_config(validation: ValidationMode) -> RhiConfig {
    RhiConfig {
        app_name: "device-init-test".to_string(),
        validation,
        ..Default::default()
    }
}

fn create_device(desc: HeadlessBackendDesc, config: &RhiConfig) -> (Rc<Device>, CommandRecorder, Settings) {
    let backend = HeadlessBackend::new(desc);
    let recorder = backend.recorder();
    let mut settings = Settings::default();
    let device = Device::new(Box::new(backend), SurfaceHandle::Headless, config, &mut settings);
    (device, recorder, settings)
}

fn triangle() -> [VertexPosCol; 3] {
    [
        VertexPosCol {
            position: [0.0, 0.5, 0.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        VertexPosCol {
            position: [0.5, -0.5, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        VertexPosCol {
            position: [-0.5, -0.5, 0.0],
            color: [0.0, 0.0, 1.0, 1.0],
        },
    ]
}

#[test]
fn test_device_ready_and_version_recorded() {
    let (device, recorder, settings) =
        create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Enabled));

    assert!(device.is_initialized());
    assert_eq!(device.state(), DeviceState::Ready);
    assert_eq!(settings.graphics_api_version.as_deref(), Some("headless 1.0"));
    assert_eq!(settings.adapter_name.as_deref(), Some("Truvis Headless Adapter"));
    assert_eq!(device.api_version(), Some("headless 1.0"));
    assert!(device.validation_enabled());
    assert!(device.debug_messenger_installed());

    assert_eq!(
        recorder.commands(),
        vec![
            RecordedCommand::CreateInstance { validation: true },
            RecordedCommand::InstallDebugMessenger,
            RecordedCommand::EnumerateAdapters,
            RecordedCommand::CreateDevice { adapter_index: 0 },
        ]
    );
}

#[test]
fn test_zero_adapters_leaves_device_unusable() {
    let desc = HeadlessBackendDesc {
        adapters: Vec::new(),
        ..Default::default()
    };
    let (device, recorder, settings) = create_device(desc, &headless_config(ValidationMode::Disabled));

    assert!(!device.is_initialized());
    assert_eq!(device.state(), DeviceState::Failed);
    assert!(settings.graphics_api_version.is_none());
    assert!(recorder.contains(&RecordedCommand::Shutdown));

    let recorded = recorder.len();
    let mut vertex_buffer = VertexBuffer::new(&device, "triangle");
    assert!(matches!(vertex_buffer.create(&triangle()), Err(RhiError::NotInitialized(_))));
    assert!(matches!(device.set_vertex_buffer(&vertex_buffer), Err(RhiError::NotInitialized(_))));
    assert!(matches!(device.set_viewport(Viewport::new(0.0, 0.0, 64.0, 64.0)), Err(RhiError::NotInitialized(_))));
    assert!(matches!(device.draw(3), Err(RhiError::NotInitialized(_))));
    assert!(matches!(device.event_begin("frame"), Err(RhiError::NotInitialized(_))));
    assert!(matches!(device.frame_end(), Err(RhiError::NotInitialized(_))));
    assert!(RenderTarget::new(&device, 64, 64, Format::R8G8B8A8Unorm, "color").is_err());
    assert_eq!(recorder.len(), recorded);

    // 失败的 Device 在初始化时已经 shutdown，drop 时不会再次调用后端
    drop(vertex_buffer);
    drop(device);
    assert_eq!(recorder.count(|c| *c == RecordedCommand::Shutdown), 1);
}

#[test]
fn test_validation_unavailable_falls_back() {
    let desc = HeadlessBackendDesc {
        validation_layers_available: false,
        ..Default::default()
    };
    let (device, recorder, settings) = create_device(desc, &headless_config(ValidationMode::Enabled));

    assert!(device.is_initialized());
    assert!(!device.validation_enabled());
    assert!(!device.debug_messenger_installed());
    assert!(recorder.contains(&RecordedCommand::CreateInstance { validation: false }));
    assert!(!recorder.contains(&RecordedCommand::InstallDebugMessenger));
    assert!(settings.graphics_api_version.is_some());
}

#[test]
fn test_debug_messenger_failure_is_not_fatal() {
    let desc = HeadlessBackendDesc {
        fail_debug_messenger: true,
        ..Default::default()
    };
    let (device, recorder, _) = create_device(desc, &headless_config(ValidationMode::Enabled));

    assert!(device.is_initialized());
    assert!(device.validation_enabled());
    assert!(!device.debug_messenger_installed());
    assert!(recorder.contains(&RecordedCommand::InstallDebugMessenger));
}

#[test]
fn test_instance_failure_stops_initialization() {
    let desc = HeadlessBackendDesc {
        fail_instance_creation: true,
        ..Default::default()
    };
    let (device, recorder, _) = create_device(desc, &headless_config(ValidationMode::Disabled));

    assert_eq!(device.state(), DeviceState::Failed);
    assert!(!recorder.contains(&RecordedCommand::EnumerateAdapters));
}

#[test]
fn test_unsuitable_adapters_are_rejected() {
    let mut other = HeadlessBackendDesc::default_adapter();
    other.adapter_type = AdapterType::Other;
    let mut no_graphics = HeadlessBackendDesc::default_adapter();
    no_graphics.graphics_queue_family = None;
    let desc = HeadlessBackendDesc {
        adapters: vec![other, no_graphics],
        ..Default::default()
    };
    let (device, recorder, _) = create_device(desc, &headless_config(ValidationMode::Disabled));

    assert!(!device.is_initialized());
    assert!(device.adapter_info().is_none());
    assert_eq!(recorder.count(|c| matches!(c, RecordedCommand::CreateDevice { .. })), 0);
}

#[test]
fn test_discrete_adapter_is_preferred() {
    let integrated = AdapterInfo {
        name: "integrated".to_string(),
        adapter_type: AdapterType::Integrated,
        ..HeadlessBackendDesc::default_adapter()
    };
    let discrete = AdapterInfo {
        name: "discrete".to_string(),
        adapter_type: AdapterType::Discrete,
        ..HeadlessBackendDesc::default_adapter()
    };
    let desc = HeadlessBackendDesc {
        adapters: vec![integrated, discrete],
        ..Default::default()
    };
    let (device, recorder, settings) = create_device(desc, &headless_config(ValidationMode::Disabled));

    assert_eq!(device.adapter_info().map(|a| a.name.as_str()), Some("discrete"));
    assert_eq!(settings.adapter_name.as_deref(), Some("discrete"));
    assert!(recorder.contains(&RecordedCommand::CreateDevice { adapter_index: 1 }));
}

#[test]
fn test_drop_shuts_down_once() {
    let (device, recorder, _) = create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Auto));
    drop(device);
    assert_eq!(recorder.count(|c| *c == RecordedCommand::Shutdown), 1);
}

#[test]
fn test_balanced_events() {
    let (device, recorder, _) =
        create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Disabled));

    device.frame_begin().unwrap();
    device.event_begin("scene").unwrap();
    device.event_begin("opaque").unwrap();
    assert_eq!(device.event_depth(), 2);
    device.event_end().unwrap();
    device.event_end().unwrap();
    device.frame_end().unwrap();

    assert_eq!(device.event_depth(), 0);
    assert_eq!(device.frame_count(), 1);
    assert_eq!(recorder.count(|c| matches!(c, RecordedCommand::BeginEvent(_))), 2);
    assert_eq!(recorder.count(|c| *c == RecordedCommand::EndEvent), 2);
}

#[test]
fn test_unbalanced_events_reported_at_frame_end() {
    let (device, recorder, _) =
        create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Disabled));

    assert!(matches!(device.event_end(), Err(RhiError::InvalidParameter(_))));

    device.event_begin("scene").unwrap();
    device.event_begin("opaque").unwrap();
    device.event_end().unwrap();
    assert_eq!(device.frame_end(), Err(RhiError::UnbalancedEvents(1)));

    // 未关闭的 event 在提交之前被关闭
    assert_eq!(recorder.count(|c| *c == RecordedCommand::EndEvent), 2);
    assert_eq!(device.event_depth(), 0);
    assert_eq!(device.frame_count(), 1);

    device.event_begin("next").unwrap();
    device.event_end().unwrap();
    device.frame_end().unwrap();
}

#[test]
fn test_set_is_idempotent() {
    let (device, recorder, _) =
        create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Disabled));
    let viewport = Viewport::new(0.0, 0.0, 128.0, 72.0);

    device.set_viewport(viewport).unwrap();
    device.set_viewport(viewport).unwrap();
    assert_eq!(recorder.count(|c| *c == RecordedCommand::Bind(Binding::Viewport(viewport))), 1);

    let mut vertex_buffer = VertexBuffer::new(&device, "triangle");
    vertex_buffer.create(&triangle()).unwrap();
    device.set_vertex_buffer(&vertex_buffer).unwrap();
    device.set_vertex_buffer(&vertex_buffer).unwrap();
    assert_eq!(recorder.count(|c| matches!(c, RecordedCommand::Bind(Binding::VertexBuffer(_)))), 1);

    // 绑定表在帧结束时清空，下一帧需要重新绑定
    device.frame_begin().unwrap();
    device.frame_end().unwrap();
    device.set_viewport(viewport).unwrap();
    assert_eq!(recorder.count(|c| *c == RecordedCommand::Bind(Binding::Viewport(viewport))), 2);
}

#[test]
fn test_draw_requires_bindings() {
    let (device, recorder, _) =
        create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Disabled));

    assert_eq!(device.draw(3), Err(RhiError::MissingBinding("vertex buffer")));

    let mut vertex_buffer = VertexBuffer::new(&device, "triangle");
    vertex_buffer.create(&triangle()).unwrap();
    device.set_vertex_buffer(&vertex_buffer).unwrap();
    assert_eq!(device.draw(3), Err(RhiError::MissingBinding("vertex shader")));

    let mut vertex_shader = Shader::new(&device, ShaderStage::Vertex, "color.vs");
    vertex_shader.create_module(&SPIRV_HEADER).unwrap();
    device.set_vertex_shader(&vertex_shader).unwrap();
    assert_eq!(device.draw(3), Err(RhiError::MissingBinding("input layout")));

    let input_layout = InputLayout::from_vertex::<VertexPosCol>(&device).unwrap();
    device.set_input_layout(&input_layout).unwrap();
    assert_eq!(device.draw(3), Err(RhiError::MissingBinding("render target")));

    let target = RenderTarget::new(&device, 64, 64, Format::R8G8B8A8Unorm, "color").unwrap();
    device.set_render_targets(&[&target], None).unwrap();
    assert!(matches!(device.draw(4), Err(RhiError::InvalidParameter(_))));
    assert_eq!(device.draw_indexed(3, 0, 0), Err(RhiError::MissingBinding("index buffer")));
    assert_eq!(recorder.count(|c| matches!(c, RecordedCommand::Draw(_))), 0);

    device.draw(3).unwrap();
    assert_eq!(recorder.count(|c| matches!(c, RecordedCommand::Draw(_))), 1);
    // draw 隐式开始了一帧
    assert!(recorder.contains(&RecordedCommand::BeginFrame));
    device.frame_end().unwrap();
}

#[test]
fn test_shader_stage_mismatch_is_rejected() {
    let (device, _, _) = create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Disabled));
    let pixel_shader = Shader::new(&device, ShaderStage::Pixel, "color.ps");
    assert!(matches!(device.set_vertex_shader(&pixel_shader), Err(RhiError::InvalidParameter(_))));
    device.set_pixel_shader(&pixel_shader).unwrap();
}

#[test]
fn test_resources_from_another_device_are_rejected() {
    let config = headless_config(ValidationMode::Disabled);
    let (device_a, _, _) = create_device(HeadlessBackendDesc::default(), &config);
    let (device_b, _, _) = create_device(HeadlessBackendDesc::default(), &config);

    let target = RenderTarget::new(&device_a, 16, 16, Format::R8G8B8A8Unorm, "a").unwrap();
    assert!(matches!(device_b.set_render_targets(&[&target], None), Err(RhiError::InvalidParameter(_))));
    device_a.set_render_targets(&[&target], None).unwrap();
}

#[test]
fn test_dropped_shader_is_unbound() {
    let (device, recorder, _) =
        create_device(HeadlessBackendDesc::default(), &headless_config(ValidationMode::Disabled));

    let mut vertex_buffer = VertexBuffer::new(&device, "triangle");
    vertex_buffer.create(&triangle()).unwrap();
    device.set_vertex_buffer(&vertex_buffer).unwrap();
    let input_layout = InputLayout::from_vertex::<VertexPosCol>(&device).unwrap();
    device.set_input_layout(&input_layout).unwrap();
    let target = RenderTarget::new(&device, 64, 64, Format::R8G8B8A8Unorm, "color").unwrap();
    device.set_render_targets(&[&target], None).unwrap();

    // 没有 module 的 shader 也会被绑定，销毁时同样需要解绑
    let vertex_shader = Shader::new(&device, ShaderStage::Vertex, "color.vs");
    device.set_vertex_shader(&vertex_shader).unwrap();
    drop(vertex_shader);

    assert!(device.bindings().vertex_shader.is_none());
    assert_eq!(device.draw(3), Err(RhiError::MissingBinding("vertex shader")));
    assert_eq!(recorder.count(|c| matches!(c, RecordedCommand::Draw(_))), 0);

    let mut vertex_shader = Shader::new(&device, ShaderStage::Vertex, "color.vs");
    vertex_shader.create_module(&SPIRV_HEADER).unwrap();
    device.set_vertex_shader(&vertex_shader).unwrap();
    drop(vertex_shader);
    assert!(recorder.contains(&RecordedCommand::DestroyShaderModule));
    assert_eq!(device.draw(3), Err(RhiError::MissingBinding("vertex shader")));
}

#[test]
fn test_failed_frame_end_still_resets_bindings() {
    let desc = HeadlessBackendDesc {
        fail_end_frame: true,
        ..Default::default()
    };
    let (device, _, _) = create_device(desc, &headless_config(ValidationMode::Disabled));

    device.frame_begin().unwrap();
    device.set_viewport(Viewport::new(0.0, 0.0, 64.0, 64.0)).unwrap();
    assert!(device.bindings().viewport.is_some());

    assert!(matches!(device.frame_end(), Err(RhiError::BackendFailure(_))));
    assert!(device.bindings().viewport.is_none());
    assert_eq!(device.frame_count(), 0);
}

#[test]
fn test_failed_bind_can_be_retried() {
    let desc = HeadlessBackendDesc {
        fail_binds: 1,
        ..Default::default()
    };
    let (device, recorder, _) = create_device(desc, &headless_config(ValidationMode::Disabled));
    let viewport = Viewport::new(0.0, 0.0, 64.0, 64.0);

    assert!(matches!(device.set_viewport(viewport), Err(RhiError::BackendFailure(_))));
    assert!(device.bindings().viewport.is_none());

    device.set_viewport(viewport).unwrap();
    assert_eq!(device.bindings().viewport, Some(viewport));
    assert_eq!(recorder.count(|c| *c == RecordedCommand::Bind(Binding::Viewport(viewport))), 1);
}

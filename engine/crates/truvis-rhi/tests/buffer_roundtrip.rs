use std::rc::Rc;

use truvis_rhi::backend::headless::{CommandRecorder, HeadlessBackend, HeadlessBackendDesc, RecordedCommand};
use truvis_rhi::resources::{ConstantBuffer, IndexBuffer, VertexBuffer};
use truvis_rhi::shader::Shader;
use truvis_rhi::types::{IndexFormat, QueryType, ShaderStage, SurfaceHandle};
use truvis_rhi::vertex::VertexPosUv;
use truvis_rhi::{Device, RhiConfig, RhiError, Settings, ValidationMode};

fn create_device(desc: HeadlessBackendDesc) -> (Rc<Device>, CommandRecorder) {
    let backend = HeadlessBackend::new(desc);
    let recorder = backend.recorder();
    let config = RhiConfig {
        validation: ValidationMode::Disabled,
        ..Default::default()
    };
    let device = Device::new(Box::new(backend), SurfaceHandle::Headless, &config, &mut Settings::default());
    (device, recorder)
}

fn map_count(recorder: &CommandRecorder) -> usize {
    recorder.count(|c| *c == RecordedCommand::MapBuffer)
}

#[test]
fn test_map_write_read_roundtrip() {
    let (device, _) = create_device(HeadlessBackendDesc::default());
    let mut buffer = VertexBuffer::new(&device, "dynamic");
    buffer.create_dynamic(16, 4).unwrap();
    assert_eq!(buffer.memory_usage(), 64);

    let payload: Vec<u8> = (0..40u8).collect();
    let mut mapping = buffer.map().unwrap();
    assert_eq!(mapping.len(), 64);
    mapping.write(8, &payload).unwrap();
    mapping.unmap().unwrap();
    assert!(!buffer.is_mapped());

    let mapping = buffer.map().unwrap();
    assert_eq!(&mapping.as_slice()[8..48], payload.as_slice());
    assert_eq!(mapping.read_pod::<u32>(8).unwrap(), u32::from_le_bytes([0, 1, 2, 3]));
    drop(mapping);
    assert!(!buffer.is_mapped());
}

#[test]
fn test_static_contents_are_uploaded() {
    let (device, recorder) = create_device(HeadlessBackendDesc::default());
    let vertices = [
        VertexPosUv {
            position: [0.0, 0.0, 0.0],
            uv: [0.0, 0.0],
        },
        VertexPosUv {
            position: [1.0, 0.0, 0.0],
            uv: [1.0, 0.0],
        },
    ];
    let mut buffer = VertexBuffer::new(&device, "quad");
    buffer.create(&vertices).unwrap();
    assert_eq!(buffer.vertex_count(), 2);
    assert_eq!(buffer.stride(), 20);
    assert_eq!(map_count(&recorder), 1);

    let mapping = buffer.map().unwrap();
    assert_eq!(mapping.read_pod::<VertexPosUv>(20).unwrap(), vertices[1]);
}

#[test]
fn test_second_map_is_rejected() {
    let (device, recorder) = create_device(HeadlessBackendDesc::default());
    let mut buffer = IndexBuffer::new(&device, "indices");
    buffer.create(&[0u16, 1, 2, 2, 1, 3]).unwrap();
    assert_eq!(buffer.index_format(), IndexFormat::U16);
    assert_eq!(buffer.index_count(), 6);

    let maps_before = map_count(&recorder);
    let mapping = buffer.map().unwrap();
    assert!(matches!(buffer.map(), Err(RhiError::AlreadyMapped(_))));
    // 冲突在前端检查，不会到达后端
    assert_eq!(map_count(&recorder), maps_before + 1);
    mapping.unmap().unwrap();
    buffer.map().unwrap().unmap().unwrap();
}

#[test]
fn test_map_before_create_fails() {
    let (device, recorder) = create_device(HeadlessBackendDesc::default());
    let buffer = VertexBuffer::new(&device, "never-created");
    assert!(matches!(buffer.map(), Err(RhiError::NotInitialized(_))));
    assert_eq!(map_count(&recorder), 0);
}

#[test]
fn test_empty_create_fails() {
    let (device, _) = create_device(HeadlessBackendDesc::default());
    let mut buffer = VertexBuffer::new(&device, "empty");
    assert!(matches!(buffer.create::<VertexPosUv>(&[]), Err(RhiError::InvalidParameter(_))));
    assert!(!buffer.is_created());
    assert!(ConstantBuffer::new(&device, 0, "zero").is_err());
}

#[test]
fn test_update_buffer_contract() {
    let (device, recorder) = create_device(HeadlessBackendDesc::default());
    let mut shader = Shader::new(&device, ShaderStage::Vertex, "transform.vs");

    // 没有 constant buffer：不会 map
    assert!(matches!(shader.update_buffer(&[1, 2, 3, 4]), Err(RhiError::NotInitialized(_))));
    assert_eq!(map_count(&recorder), 0);

    shader.create_constant_buffer(16).unwrap();
    assert!(matches!(shader.update_buffer(&[]), Err(RhiError::InvalidParameter(_))));
    assert!(matches!(shader.update_buffer(&[0; 8]), Err(RhiError::InvalidParameter(_))));
    assert_eq!(map_count(&recorder), 0);

    let data: Vec<u8> = (100..120).collect();
    shader.update_buffer(&data).unwrap();
    assert_eq!(map_count(&recorder), 1);
    assert_eq!(recorder.count(|c| *c == RecordedCommand::UnmapBuffer), 1);

    let constant_buffer = shader.constant_buffer().unwrap();
    let mapping = constant_buffer.map().unwrap();
    assert_eq!(mapping.as_slice(), &data[..16]);
}

#[test]
fn test_update_fails_while_mapped() {
    let (device, _) = create_device(HeadlessBackendDesc::default());
    let mut shader = Shader::new(&device, ShaderStage::Pixel, "material.ps");
    shader.create_constant_buffer(4).unwrap();

    let constant_buffer = shader.constant_buffer().unwrap();
    let mapping = constant_buffer.map().unwrap();
    assert!(matches!(shader.update(&7u32), Err(RhiError::AlreadyMapped(_))));
    drop(mapping);
    shader.update(&7u32).unwrap();
}

#[test]
fn test_macro_redefinition_keeps_last_value() {
    let (device, _) = create_device(HeadlessBackendDesc::default());
    let mut shader = Shader::new(&device, ShaderStage::Pixel, "lit.ps");
    shader.add_define("LIGHT_COUNT", "4");
    shader.add_define_flag("USE_SHADOWS");
    shader.add_define("LIGHT_COUNT", "8");

    assert_eq!(shader.defines(), vec![("LIGHT_COUNT", "8"), ("USE_SHADOWS", "1")]);
}

#[test]
fn test_profiling_duration_resolves_after_submit() {
    let (device, _) = create_device(HeadlessBackendDesc::default());
    let disjoint = device.profiling_create_query(QueryType::TimestampDisjoint).unwrap();
    let start = device.profiling_create_query(QueryType::Timestamp).unwrap();
    let end = device.profiling_create_query(QueryType::Timestamp).unwrap();

    // 类型不匹配
    assert!(matches!(device.profiling_query_start(&start), Err(RhiError::InvalidParameter(_))));
    assert!(matches!(device.profiling_get_time_stamp(&disjoint), Err(RhiError::InvalidParameter(_))));

    device.frame_begin().unwrap();
    device.profiling_query_start(&disjoint).unwrap();
    device.profiling_get_time_stamp(&start).unwrap();
    device.profiling_get_time_stamp(&end).unwrap();
    device.profiling_query_end(&disjoint).unwrap();
    assert_eq!(device.profiling_get_duration(&disjoint, &start, &end).unwrap(), None);
    device.frame_end().unwrap();

    let duration = device.profiling_get_duration(&disjoint, &start, &end).unwrap().unwrap();
    assert!(duration >= 0.0);
}

#[test]
fn test_disjoint_drops_sample() {
    let desc = HeadlessBackendDesc {
        force_disjoint: true,
        ..Default::default()
    };
    let (device, _) = create_device(desc);
    let disjoint = device.profiling_create_query(QueryType::TimestampDisjoint).unwrap();
    let start = device.profiling_create_query(QueryType::Timestamp).unwrap();
    let end = device.profiling_create_query(QueryType::Timestamp).unwrap();

    device.profiling_query_start(&disjoint).unwrap();
    device.profiling_get_time_stamp(&start).unwrap();
    device.profiling_get_time_stamp(&end).unwrap();
    device.profiling_query_end(&disjoint).unwrap();
    device.frame_end().unwrap();

    assert_eq!(device.profiling_get_duration(&disjoint, &start, &end).unwrap(), None);
}

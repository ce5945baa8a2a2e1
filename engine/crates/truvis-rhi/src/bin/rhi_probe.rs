//! 检查当前环境下 RHI 是否可用
//!
//! 用法：`rhi-probe [config.toml]`。创建 Device，输出选中的 adapter，
//! 然后对一次 render target clear 进行 GPU 计时。

use anyhow::Context;
use truvis_rhi::resources::RenderTarget;
use truvis_rhi::types::{Format, QueryType, SurfaceHandle};
use truvis_rhi::{Device, RhiConfig, Settings};

/// 等待计时结果的最大帧数
const MAX_POLL_FRAMES: u32 = 16;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => RhiConfig::load(&path)?,
        None => RhiConfig::default(),
    };
    truvis_crate_tools::init_log::init_log_with_filter(&config.log_level);
    log::info!("rhi-probe config: {:?}", config);

    let mut settings = Settings::default();
    let device = Device::from_config(&config, SurfaceHandle::Headless, &mut settings)?;
    if !device.is_initialized() {
        anyhow::bail!("device initialization failed, state: {:?}", device.state());
    }

    let adapter = device.adapter_info().context("initialized device without an adapter")?;
    log::info!(
        "adapter: {} ({:?}), vendor 0x{:04x}, device 0x{:04x}, api {}",
        adapter.name,
        adapter.adapter_type,
        adapter.vendor_id,
        adapter.device_id,
        settings.graphics_api_version.as_deref().unwrap_or("unknown")
    );
    log::info!(
        "validation: {}, debug messenger: {}",
        device.validation_enabled(),
        device.debug_messenger_installed()
    );

    let target = RenderTarget::new(&device, 256, 256, Format::R8G8B8A8Unorm, "probe")?;
    let disjoint = device.profiling_create_query(QueryType::TimestampDisjoint)?;
    let start = device.profiling_create_query(QueryType::Timestamp)?;
    let end = device.profiling_create_query(QueryType::Timestamp)?;

    device.frame_begin()?;
    device.event_begin("probe clear")?;
    device.profiling_query_start(&disjoint)?;
    device.profiling_get_time_stamp(&start)?;
    device.clear_render_target(&target, glam::Vec4::new(0.1, 0.2, 0.3, 1.0))?;
    device.profiling_get_time_stamp(&end)?;
    device.profiling_query_end(&disjoint)?;
    device.event_end()?;
    device.frame_end()?;

    let mut duration = None;
    for _ in 0..MAX_POLL_FRAMES {
        duration = device.profiling_get_duration(&disjoint, &start, &end)?;
        if duration.is_some() {
            break;
        }
        device.frame_begin()?;
        device.frame_end()?;
    }
    match duration {
        Some(ms) => log::info!("clear of a {}x{} target took {:.4} ms", target.width(), target.height(), ms),
        None => log::warn!("gpu timing was not available after {} frames", MAX_POLL_FRAMES),
    }

    device.wait_idle()?;
    Ok(())
}

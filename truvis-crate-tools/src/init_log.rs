use std::io::Write;

/// 默认使用 `info` 级别，`RUST_LOG` 存在时以 `RUST_LOG` 为准
pub fn init_log() {
    init_log_with_filter("info");
}

/// # param
/// * default_filter - env_logger 风格的过滤字符串，例如 `info` 或 `truvis_rhi=debug`
pub fn init_log_with_filter(default_filter: &str) {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").split(['\\', '/']).next_back().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .parse_filters(&filters)
        .try_init();

    // 重复初始化（例如多个测试共用进程）时保留第一次的 logger
    if let Err(e) = result {
        log::debug!("logger already initialized: {}", e);
    }
}

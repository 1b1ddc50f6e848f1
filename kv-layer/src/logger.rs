use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::path::Path;

use crate::store::{StoreError, StoreResult};

/// 解析日志级别，无法识别时使用 info
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

pub fn init_logger(log_file: &str, level: &str) -> StoreResult<()> {
    // 确保日志目录存在
    if let Some(parent) = Path::new(log_file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // 打开或创建日志文件
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let level_filter = parse_level(level);

    // 同时初始化终端日志和文件日志
    CombinedLogger::init(vec![
        // 输出到终端的日志
        TermLogger::new(
            level_filter,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        // 输出到文件的日志
        WriteLogger::new(level_filter, Config::default(), file),
    ])
    .map_err(|e| StoreError::ConfigError(format!("无法初始化日志系统: {}", e)))
}

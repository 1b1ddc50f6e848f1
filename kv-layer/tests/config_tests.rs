use kv_layer::config::Settings;
use kv_layer::logger::{init_logger, parse_level};
use log::LevelFilter;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_default_values() {
    let config = Settings::default();

    // 验证加锁默认配置
    assert_eq!(config.lock.default_max_wait_seconds, 5);
    assert_eq!(config.lock.retry_delay_ms, 1);

    // 验证阻塞读取与订阅默认配置
    assert_eq!(config.blocking.poll_interval_ms, 10);
    assert_eq!(config.watch.event_channel_capacity, 100);
    assert_eq!(config.watch.reconnect_delay_ms, 100);

    // 验证日志默认配置
    assert_eq!(config.logging.log_file, "logs/kv-layer.log");
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_config_creates_default_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("default.toml");

    // 文件和目录都不存在时自动创建
    let config = Settings::load(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config.lock.default_max_wait_seconds, 5);
    assert_eq!(config.watch.event_channel_capacity, 100);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[lock]"));
    assert!(content.contains("poll_interval_ms = 10"));
}

#[test]
fn test_config_partial_override() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(
        &path,
        "[lock]\ndefault_max_wait_seconds = -1\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config = Settings::load(&path).unwrap();
    assert_eq!(config.lock.default_max_wait_seconds, -1);
    assert_eq!(config.logging.level, "debug");

    // 未出现的字段保持默认值
    assert_eq!(config.lock.retry_delay_ms, 1);
    assert_eq!(config.blocking.poll_interval_ms, 10);
    assert_eq!(config.logging.log_file, "logs/kv-layer.log");
}

#[test]
fn test_config_invalid_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[blocking]\npoll_interval_ms = \"fast\"\n").unwrap();

    assert!(Settings::load(&path).is_err());
}

#[test]
fn test_parse_log_level() {
    assert_eq!(parse_level("debug"), LevelFilter::Debug);
    assert_eq!(parse_level("WARN"), LevelFilter::Warn);
    assert_eq!(parse_level("off"), LevelFilter::Off);
    // 无法识别时使用 info
    assert_eq!(parse_level("verbose"), LevelFilter::Info);
}

#[test]
fn test_init_logger_writes_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs").join("kv-layer.log");
    let path_str = path.to_str().unwrap();

    // 日志目录不存在时自动创建
    init_logger(path_str, "info").unwrap();
    assert!(path.exists());

    log::info!("日志初始化完成");
    log::debug!("低于 info 的日志不会写入");
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("日志初始化完成"));
    assert!(!content.contains("低于 info"));

    // 全局日志只能初始化一次
    assert!(init_logger(path_str, "info").is_err());
}

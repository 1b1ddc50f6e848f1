use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

const DEFAULT_CONFIG_CONTENT: &str = r#"[lock]
# 加锁的默认最长等待时间(秒)，负数表示一直等待
default_max_wait_seconds = 5
# 加锁重试间隔(毫秒)
retry_delay_ms = 1

[blocking]
# 阻塞读取的轮询间隔(毫秒)
poll_interval_ms = 10

[watch]
# 每个事件通道的缓冲容量
event_channel_capacity = 100
# 连接断开后的重连间隔(毫秒)
reconnect_delay_ms = 100

[logging]
# 日志文件路径
log_file = "logs/kv-layer.log"
# 日志级别: "error", "warn", "info", "debug", "trace"
level = "info"
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_max_wait_seconds: i64,
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            default_max_wait_seconds: 5,
            retry_delay_ms: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    pub poll_interval_ms: u64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        BlockingConfig { poll_interval_ms: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub event_channel_capacity: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            event_channel_capacity: 100,
            reconnect_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_file: "logs/kv-layer.log".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lock: LockConfig,
    pub blocking: BlockingConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// 从 `config/default.toml` 加载配置
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// 从指定文件加载配置，文件不存在时先写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        // 确保配置目录存在
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    ConfigError::Message(format!("无法创建配置目录: {}", e))
                })?;
            }
        }

        // 检查配置文件是否存在，如果不存在则创建默认配置
        if !path.exists() {
            let mut file = fs::File::create(path).map_err(|e| {
                ConfigError::Message(format!("无法创建配置文件: {}", e))
            })?;

            file.write_all(DEFAULT_CONFIG_CONTENT.as_bytes()).map_err(|e| {
                ConfigError::Message(format!("无法写入配置文件: {}", e))
            })?;
        }

        let settings = Config::builder()
            .add_source(File::from(path))
            .build()?;

        settings.try_deserialize()
    }
}

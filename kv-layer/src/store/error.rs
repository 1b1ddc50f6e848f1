use std::fmt;

/// 存储操作错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// 键不存在
    KeyNotFound(String),
    /// 键被锁定，超过等待时间仍未获得锁
    KeyLocked(String),
    /// 非法键（空键或零字节哨兵）
    InvalidKey(String),
    /// 值的编码类型与操作不匹配
    TypeMismatch { expected: &'static str },
    /// 列表为空
    ListEmpty(String),
    /// 列表下标越界
    ListIndexOutOfRange { key: String, index: i64, length: usize },
    /// 哈希字段不存在
    HashFieldNotFound { key: String, field: String },
    /// 无法转换为存储值
    UnsupportedValue(String),
    /// 序列化错误
    SerializationError(String),
    /// 文件IO错误
    IoError(String),
    /// 配置错误
    ConfigError(String),
    /// watcher 或客户端已关闭
    WatchClosed,
    /// 底层存储错误
    Backend(String),
}

impl StoreError {
    /// 调用方可以重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::KeyLocked(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::KeyNotFound(key) => write!(f, "键 '{}' 不存在", key),
            StoreError::KeyLocked(key) => write!(f, "键 '{}' 已被锁定", key),
            StoreError::InvalidKey(key) => write!(f, "非法的键 {:?}", key),
            StoreError::TypeMismatch { expected } => {
                write!(f, "值类型不匹配: 期望 {}", expected)
            }
            StoreError::ListEmpty(key) => write!(f, "列表 '{}' 为空", key),
            StoreError::ListIndexOutOfRange { key, index, length } => {
                write!(f, "列表 '{}' 下标 {} 越界 (长度 {})", key, index, length)
            }
            StoreError::HashFieldNotFound { key, field } => {
                write!(f, "哈希 '{}' 中不存在字段 '{}'", key, field)
            }
            StoreError::UnsupportedValue(msg) => write!(f, "不支持的值: {}", msg),
            StoreError::SerializationError(msg) => write!(f, "序列化错误: {}", msg),
            StoreError::IoError(msg) => write!(f, "IO错误: {}", msg),
            StoreError::ConfigError(msg) => write!(f, "配置错误: {}", msg),
            StoreError::WatchClosed => write!(f, "watcher 已关闭"),
            StoreError::Backend(msg) => write!(f, "存储错误: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// 存储操作结果类型
pub type StoreResult<T> = Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::IoError(error.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(error: bincode::Error) -> Self {
        StoreError::SerializationError(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::SerializationError(error.to_string())
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(error: config::ConfigError) -> Self {
        StoreError::ConfigError(error.to_string())
    }
}

pub mod store;
pub mod config;
pub mod command;
pub mod logger;

// 重新导出一些常用的类型，使调用方更容易使用
pub use store::{MemoryStore, Store, StoreError, StoreManager, StoreResult, Value};
pub use command::{Command, CommandHandler};
pub use config::Settings;

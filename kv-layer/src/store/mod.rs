// 底层存储抽象与参考实现
mod request;
mod traits;
mod expiry;
mod store_core;

// 值模型与编解码
mod error;
mod data_types;
pub mod codec;

// 锁与类型化操作
mod lock;
mod store_manager;
mod string_ops;
mod number_ops;
mod list_ops;
mod hash_ops;
mod key_ops;

// 变更通知
mod watch;
mod watch_client;

pub use request::{
    key_in_range, Compare, CompareResult, CompareTarget, DeleteRangeRequest, DeleteRangeResponse,
    EventKind, KeyValue, LeaseId, PutRequest, PutResponse, RangeRequest, RangeResponse, Revision,
    TxnOp, TxnOpResponse, TxnRequest, TxnResponse, WatchEvent, WatchId, WatchResponse,
};
pub use traits::{Store, WatchStream};
pub use expiry::LeaseManager;
pub use store_core::{MemoryStore, MemoryWatchStream};

pub use error::{StoreError, StoreResult};
pub use data_types::{Hash, List, Shape, Value};

pub use lock::{check_key, lock_key, LockManager, LOCK_MARKER, LOCK_SUFFIX};
pub use store_manager::StoreManager;
pub use list_ops::ListHandler;

pub use watch::{Event, WatchController, WatchRequest, Watcher, WatcherHandle, PREFIX_MARKER};
pub use watch_client::{EventChannel, WatchClient, WatchConnector};

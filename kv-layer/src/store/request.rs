//! 底层存储的请求与响应类型，语义与 etcd KV API 保持一致。
//!
//! `range_end` 约定：空表示只匹配 `key` 本身；零字节表示 `key` 之后的所有键；
//! 其余情况为半开区间 `[key, range_end)`。

use super::codec::ZERO_BYTE;

pub type Revision = i64;
pub type LeaseId = i64;
pub type WatchId = i64;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: Revision,
    pub mod_revision: Revision,
    /// 自创建以来的修改次数，键不存在时视为 0
    pub version: i64,
    pub lease: LeaseId,
}

/// 判断 `key` 是否落在 `[start, range_end)` 所描述的区间内
pub fn key_in_range(key: &[u8], start: &[u8], range_end: &[u8]) -> bool {
    if range_end.is_empty() {
        key == start
    } else if range_end == ZERO_BYTE {
        key >= start
    } else {
        key >= start && key < range_end
    }
}

#[derive(Debug, Clone, Default)]
pub struct RangeRequest {
    pub key: Vec<u8>,
    pub range_end: Vec<u8>,
    pub keys_only: bool,
    /// 0 表示不限
    pub limit: i64,
    /// 0 表示最新版本
    pub revision: Revision,
}

impl RangeRequest {
    pub fn single(key: impl Into<Vec<u8>>) -> Self {
        RangeRequest {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn range(key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        RangeRequest {
            key: key.into(),
            range_end: range_end.into(),
            ..Default::default()
        }
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    /// 区间内的键总数，不受 limit 影响
    pub count: i64,
    pub revision: Revision,
}

#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// 0 表示不绑定租约
    pub lease: LeaseId,
    /// 保留原值，只更新租约
    pub ignore_value: bool,
}

impl PutRequest {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        PutRequest {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutResponse {
    pub revision: Revision,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRangeRequest {
    pub key: Vec<u8>,
    pub range_end: Vec<u8>,
}

impl DeleteRangeRequest {
    pub fn single(key: impl Into<Vec<u8>>) -> Self {
        DeleteRangeRequest {
            key: key.into(),
            range_end: Vec::new(),
        }
    }

    pub fn range(key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        DeleteRangeRequest {
            key: key.into(),
            range_end: range_end.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteRangeResponse {
    pub deleted: i64,
    pub revision: Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    Greater,
    Less,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompareTarget {
    Version(i64),
    CreateRevision(Revision),
    ModRevision(Revision),
    Value(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compare {
    pub key: Vec<u8>,
    pub result: CompareResult,
    pub target: CompareTarget,
}

impl Compare {
    pub fn version(key: impl Into<Vec<u8>>, result: CompareResult, version: i64) -> Self {
        Compare {
            key: key.into(),
            result,
            target: CompareTarget::Version(version),
        }
    }

    pub fn value(key: impl Into<Vec<u8>>, result: CompareResult, value: impl Into<Vec<u8>>) -> Self {
        Compare {
            key: key.into(),
            result,
            target: CompareTarget::Value(value.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TxnOp {
    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxnOpResponse {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
}

/// 比较全部成立（或没有比较条件）时执行 `success`，否则执行 `failure`
#[derive(Debug, Clone, Default)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub responses: Vec<TxnOpResponse>,
    pub revision: Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub kv: KeyValue,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchResponse {
    pub watch_id: WatchId,
    pub events: Vec<WatchEvent>,
    pub revision: Revision,
}

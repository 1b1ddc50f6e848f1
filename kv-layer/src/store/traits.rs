use std::sync::mpsc::Receiver;

use super::error::StoreResult;
use super::request::{
    DeleteRangeRequest, DeleteRangeResponse, LeaseId, PutRequest, PutResponse, RangeRequest,
    RangeResponse, Revision, TxnRequest, TxnResponse, WatchId, WatchResponse,
};

/// 底层事务型键值存储
///
/// 所有操作都是原子的；`txn` 中的比较与分支操作在同一个修订版本内完成。
pub trait Store: Send + Sync {
    /// 读取区间内的键值
    fn range(&self, req: RangeRequest) -> StoreResult<RangeResponse>;

    /// 写入单个键。`ignore_value` 时键必须已存在
    fn put(&self, req: PutRequest) -> StoreResult<PutResponse>;

    /// 删除区间内的键
    fn delete_range(&self, req: DeleteRangeRequest) -> StoreResult<DeleteRangeResponse>;

    /// 申请租约，到期后绑定的键被删除
    fn lease_grant(&self, ttl_seconds: i64) -> StoreResult<LeaseId>;

    /// 条件事务
    fn txn(&self, req: TxnRequest) -> StoreResult<TxnResponse>;

    /// 打开一条新的 watch 流。事件从返回的接收端读取，
    /// 流关闭后接收端断开。
    fn watch_stream(&self) -> StoreResult<(Box<dyn WatchStream>, Receiver<WatchResponse>)>;
}

/// 一条 watch 流，可以在上面注册多个 watch
pub trait WatchStream: Send {
    /// 注册一个区间 watch，返回其 id；`start_revision` 为 0 表示从当前版本开始
    fn watch(&mut self, key: &[u8], range_end: &[u8], start_revision: Revision) -> StoreResult<WatchId>;

    /// 取消 watch，未知 id 忽略
    fn cancel(&mut self, id: WatchId) -> StoreResult<()>;

    /// 关闭整条流
    fn close(&mut self);
}

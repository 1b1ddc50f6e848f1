use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::codec::ZERO_BYTE;
use super::error::{StoreError, StoreResult};
use super::request::{
    Compare, CompareResult, DeleteRangeRequest, PutRequest, TxnOp, TxnRequest, TxnResponse,
};
use super::traits::Store;

/// 锁标记键的后缀，标记与普通值共享同一个键空间
pub const LOCK_SUFFIX: &str = "*_KV_LOCK";

/// 锁标记的值
pub const LOCK_MARKER: &[u8] = ZERO_BYTE;

pub fn lock_key(key: &str) -> Vec<u8> {
    let mut marker = key.as_bytes().to_vec();
    marker.extend_from_slice(LOCK_SUFFIX.as_bytes());
    marker
}

/// 空键与零字节哨兵不能作为普通键写入
pub fn check_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.as_bytes() == ZERO_BYTE {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// 最长等待时间，秒。负数或超出时钟范围表示一直等待，0 表示只尝试一次
pub(crate) fn wait_deadline(max_wait_seconds: i64) -> Option<Instant> {
    let seconds = u64::try_from(max_wait_seconds).ok()?;
    Instant::now().checked_add(Duration::from_secs(seconds))
}

/// 基于 CAS 事务的按键互斥锁
///
/// 每次尝试都是一个事务：锁标记不存在（version 为 0）时写入标记并成功，
/// 否则什么也不做，由调用方按固定间隔重试直到超时。
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn Store>,
    retry_delay: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>, retry_delay: Duration) -> Self {
        LockManager { store, retry_delay }
    }

    /// 尝试一次加锁，返回是否成功
    pub fn try_acquire(&self, key: &str) -> StoreResult<bool> {
        let marker = lock_key(key);
        let res = self.store.txn(TxnRequest {
            compare: vec![Compare::version(marker.clone(), CompareResult::Equal, 0)],
            success: vec![TxnOp::Put(PutRequest::new(marker, LOCK_MARKER))],
            failure: vec![],
        })?;
        Ok(res.succeeded)
    }

    /// 加锁，超过 `max_wait_seconds` 仍未获得则返回 `KeyLocked`
    pub fn lock(&self, key: &str, max_wait_seconds: i64) -> StoreResult<()> {
        let deadline = wait_deadline(max_wait_seconds);
        loop {
            if self.try_acquire(key)? {
                debug!("获得锁 '{}'", key);
                return Ok(());
            }
            if max_wait_seconds == 0 {
                return Err(StoreError::KeyLocked(key.to_string()));
            }

            thread::sleep(self.retry_delay);
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("等待锁 '{}' 超时", key);
                return Err(StoreError::KeyLocked(key.to_string()));
            }
        }
    }

    /// 无条件删除锁标记
    pub fn unlock(&self, key: &str) -> StoreResult<()> {
        self.store.delete_range(DeleteRangeRequest::single(lock_key(key)))?;
        debug!("释放锁 '{}'", key);
        Ok(())
    }

    /// 释放锁失败时只记录日志，用于错误路径
    pub fn release_quietly(&self, key: &str) {
        if let Err(e) = self.unlock(key) {
            warn!("释放锁 '{}' 失败: {}", key, e);
        }
    }

    /// 在同一个事务里删除锁标记并写入新值
    pub fn unlock_and_write(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        check_key(key)?;
        self.store.txn(TxnRequest {
            compare: vec![],
            success: vec![
                TxnOp::DeleteRange(DeleteRangeRequest::single(lock_key(key))),
                TxnOp::Put(PutRequest::new(key, value)),
            ],
            failure: vec![],
        })?;
        debug!("释放锁并写入 '{}'", key);
        Ok(())
    }

    /// 在锁未被持有时执行写操作，被持有则重试直到超时
    pub fn write_unless_locked(
        &self,
        key: &str,
        op: TxnOp,
        max_wait_seconds: i64,
    ) -> StoreResult<TxnResponse> {
        let marker = lock_key(key);
        let deadline = wait_deadline(max_wait_seconds);
        loop {
            let res = self.store.txn(TxnRequest {
                compare: vec![Compare::version(marker.clone(), CompareResult::Equal, 0)],
                success: vec![op.clone()],
                failure: vec![],
            })?;
            if res.succeeded {
                return Ok(res);
            }

            thread::sleep(self.retry_delay);
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(StoreError::KeyLocked(key.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::request::RangeRequest;
    use crate::store::store_core::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, LockManager) {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::new(store.clone(), Duration::from_millis(1));
        (store, locks)
    }

    #[test]
    fn test_lock_marker_lifecycle() {
        let (store, locks) = manager();
        locks.lock("key", 1).unwrap();
        let marker = store.range(RangeRequest::single(lock_key("key"))).unwrap();
        assert_eq!(marker.kvs[0].value, LOCK_MARKER.to_vec());

        // 0 秒等待时立即失败
        assert_eq!(
            locks.lock("key", 0),
            Err(StoreError::KeyLocked("key".to_string()))
        );

        locks.unlock("key").unwrap();
        assert!(locks.try_acquire("key").unwrap());
    }

    #[test]
    fn test_lock_timeout() {
        let (_store, locks) = manager();
        locks.lock("busy", 1).unwrap();

        let start = Instant::now();
        assert!(matches!(locks.lock("busy", 1), Err(StoreError::KeyLocked(_))));
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_unlock_and_write_is_atomic() {
        let (store, locks) = manager();
        locks.lock("k", 1).unwrap();
        let (mut stream, rx) = store.watch_stream().unwrap();
        stream.watch(b"k", ZERO_BYTE, 0).unwrap();

        locks.unlock_and_write("k", b"v".to_vec()).unwrap();

        // 删除标记与写入值出现在同一次通知、同一个版本里
        let resp = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(resp.events.len(), 2);
        assert!(resp.events.iter().all(|ev| ev.kv.mod_revision == resp.revision));
        assert!(locks.try_acquire("k").unwrap());
        assert_eq!(
            store.range(RangeRequest::single("k")).unwrap().kvs[0].value,
            b"v".to_vec()
        );
    }

    #[test]
    fn test_huge_wait_has_no_deadline() {
        assert!(wait_deadline(i64::MAX).is_none());
        assert!(wait_deadline(-1).is_none());
        assert!(wait_deadline(0).is_some());

        let (_store, locks) = manager();
        locks.lock("k", i64::MAX).unwrap();
        locks.unlock("k").unwrap();
    }

    #[test]
    fn test_invalid_keys() {
        let (_store, locks) = manager();
        assert!(matches!(
            locks.unlock_and_write("", b"v".to_vec()),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(check_key("\0"), Err(StoreError::InvalidKey(_))));
        assert!(check_key("ok").is_ok());
    }

    #[test]
    fn test_write_unless_locked_waits_for_release() {
        let (store, locks) = manager();
        locks.lock("shared", 1).unwrap();

        let releaser = locks.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            releaser.unlock("shared").unwrap();
        });

        locks
            .write_unless_locked("shared", TxnOp::Put(PutRequest::new("shared", "x")), 2)
            .unwrap();
        handle.join().unwrap();
        assert_eq!(
            store.range(RangeRequest::single("shared")).unwrap().kvs[0].value,
            b"x".to_vec()
        );
    }
}

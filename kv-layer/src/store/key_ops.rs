use log::{debug, info};

use super::codec::{prefix_upper_bound, ZERO_BYTE};
use super::error::{StoreError, StoreResult};
use super::request::{DeleteRangeRequest, PutRequest, RangeRequest, TxnOp, TxnOpResponse};
use super::store_manager::StoreManager;

/// 键枚举与键级操作
impl StoreManager {
    /// 所有键（包括锁标记）
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.scan_keys(RangeRequest::range(ZERO_BYTE, ZERO_BYTE))
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.scan_keys(RangeRequest::range(
            prefix,
            prefix_upper_bound(prefix.as_bytes()),
        ))
    }

    fn scan_keys(&self, req: RangeRequest) -> StoreResult<Vec<String>> {
        let res = self.store().range(req.keys_only())?;
        Ok(res
            .kvs
            .into_iter()
            .map(|kv| String::from_utf8_lossy(&kv.key).into_owned())
            .collect())
    }

    pub fn has(&self, key: &str) -> StoreResult<bool> {
        let res = self.store().range(RangeRequest::single(key).keys_only())?;
        Ok(res.count > 0)
    }

    /// `seconds` 秒后删除键，值保持不变
    pub fn set_expire(&self, key: &str, seconds: i64) -> StoreResult<()> {
        let lease = self.store().lease_grant(seconds)?;
        let req = PutRequest {
            key: key.as_bytes().to_vec(),
            lease,
            ignore_value: true,
            ..Default::default()
        };
        match self.store().put(req) {
            Ok(_) => {
                debug!("键 '{}' 将在 {} 秒后过期", key, seconds);
                Ok(())
            }
            Err(StoreError::KeyNotFound(_)) => Err(StoreError::KeyNotFound(key.to_string())),
            Err(e) => Err(e),
        }
    }

    /// 删除键；键被锁定时等待，超时返回 `KeyLocked`。返回键是否存在
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let res = self.locks().write_unless_locked(
            key,
            TxnOp::DeleteRange(DeleteRangeRequest::single(key)),
            self.max_lock_wait(),
        )?;
        Ok(matches!(
            res.responses.first(),
            Some(TxnOpResponse::DeleteRange(d)) if d.deleted > 0
        ))
    }

    /// 清空全部键，包括锁标记
    pub fn clear(&self) -> StoreResult<i64> {
        let res = self
            .store()
            .delete_range(DeleteRangeRequest::range(ZERO_BYTE, ZERO_BYTE))?;
        info!("清空存储，删除了 {} 个键", res.deleted);
        Ok(res.deleted)
    }
}

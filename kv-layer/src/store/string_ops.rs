use std::collections::{BTreeMap, HashMap};

use log::debug;

use super::codec::{self, prefix_upper_bound};
use super::data_types::Value;
use super::error::{StoreError, StoreResult};
use super::lock::check_key;
use super::request::{PutRequest, RangeRequest, TxnOp, TxnOpResponse, TxnRequest};
use super::store_manager::{Mutation, StoreManager};

/// 字节串读写
impl StoreManager {
    /// 读取键的原始值
    pub fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.read_raw(key)?
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    /// 阻塞读取，直到键出现或超时。`timeout_seconds` 不大于 0 时一直等待
    pub fn get_blocking(&self, key: &str, timeout_seconds: i64) -> StoreResult<Vec<u8>> {
        self.wait_for(key, timeout_seconds, || self.read_raw(key))?
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    /// 在一个事务里读取多个键，不存在的键被忽略
    pub fn get_many(&self, keys: &[&str]) -> StoreResult<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let res = self.store().txn(TxnRequest {
            compare: vec![],
            success: keys
                .iter()
                .map(|key| TxnOp::Range(RangeRequest::single(*key)))
                .collect(),
            failure: vec![],
        })?;

        let mut values = HashMap::new();
        for (key, resp) in keys.iter().zip(res.responses) {
            if let TxnOpResponse::Range(range) = resp {
                if let Some(kv) = range.kvs.into_iter().next() {
                    values.insert(key.to_string(), kv.value);
                }
            }
        }
        Ok(values)
    }

    /// 读取所有以 `prefix` 开头的键
    pub fn get_with_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let res = self.store().range(RangeRequest::range(
            prefix,
            prefix_upper_bound(prefix.as_bytes()),
        ))?;
        Ok(res
            .kvs
            .into_iter()
            .map(|kv| (String::from_utf8_lossy(&kv.key).into_owned(), kv.value))
            .collect())
    }

    /// 写入任意值；键被锁定时等待，超时返回 `KeyLocked`
    pub fn set(&self, key: &str, value: impl Into<Value>) -> StoreResult<()> {
        check_key(key)?;
        let bytes = codec::encode(&value.into())?;
        self.locks().write_unless_locked(
            key,
            TxnOp::Put(PutRequest::new(key, bytes)),
            self.max_lock_wait(),
        )?;
        debug!("写入键 '{}'", key);
        Ok(())
    }

    /// 键不存在时写入，返回是否写入
    pub fn set_nx(&self, key: &str, value: impl Into<Value>) -> StoreResult<bool> {
        let bytes = codec::encode(&value.into())?;
        self.modify(key, |current| match current {
            Some(_) => Ok(Mutation::Skip(false)),
            None => Ok(Mutation::Write(bytes, true)),
        })
    }

    /// 逐个写入，返回写入失败的键及其错误
    pub fn set_many<I, V>(&self, values: I) -> HashMap<String, StoreError>
    where
        I: IntoIterator<Item = (String, V)>,
        V: Into<Value>,
    {
        values
            .into_iter()
            .filter_map(|(key, value)| self.set(&key, value).err().map(|e| (key, e)))
            .collect()
    }

    /// 值的字节长度
    pub fn length(&self, key: &str) -> StoreResult<usize> {
        Ok(self.get(key)?.len())
    }
}

use super::codec;
use super::data_types::{Hash, Value};
use super::error::{StoreError, StoreResult};
use super::store_manager::{Mutation, StoreManager};

fn encode_hash(hash: Hash) -> StoreResult<Vec<u8>> {
    codec::encode(&Value::Hash(hash))
}

/// 哈希操作。读取不存在的键返回 `KeyNotFound`，写字段时自动创建
impl StoreManager {
    pub fn get_hash(&self, key: &str) -> StoreResult<Hash> {
        codec::decode_hash(&self.get(key)?)
    }

    pub fn set_hash(&self, key: &str, hash: Hash) -> StoreResult<()> {
        self.set(key, hash)
    }

    pub fn get_hash_field(&self, key: &str, field: &str) -> StoreResult<Vec<u8>> {
        self.get_hash(key)?
            .remove(field)
            .ok_or_else(|| StoreError::HashFieldNotFound {
                key: key.to_string(),
                field: field.to_string(),
            })
    }

    /// 读取部分字段，不存在的字段被忽略
    pub fn get_hash_fields(&self, key: &str, fields: &[&str]) -> StoreResult<Hash> {
        let mut hash = self.get_hash(key)?;
        Ok(fields
            .iter()
            .filter_map(|field| hash.remove_entry(*field))
            .collect())
    }

    pub fn hash_has(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.get_hash(key)?.contains_key(field))
    }

    pub fn hash_length(&self, key: &str) -> StoreResult<usize> {
        Ok(self.get_hash(key)?.len())
    }

    /// 字段名，按字典序
    pub fn hash_fields(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.get_hash(key)?.into_keys().collect())
    }

    /// 字段值，按字段名的字典序
    pub fn hash_values(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.get_hash(key)?.into_values().collect())
    }

    pub fn set_hash_field(&self, key: &str, field: &str, value: impl Into<Vec<u8>>) -> StoreResult<()> {
        let mut fields = Hash::new();
        fields.insert(field.to_string(), value.into());
        self.set_hash_fields(key, fields)
    }

    /// 合并写入多个字段
    pub fn set_hash_fields(&self, key: &str, fields: Hash) -> StoreResult<()> {
        self.modify(key, |current| {
            let mut hash = match current {
                Some(bytes) => codec::decode_hash(bytes)?,
                None => Hash::new(),
            };
            hash.extend(fields);
            Ok(Mutation::Write(encode_hash(hash)?, ()))
        })
    }

    /// 删除字段，返回字段是否存在
    pub fn del_hash_field(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.modify(key, |current| {
            let bytes = current.ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
            let mut hash = codec::decode_hash(bytes)?;
            if hash.remove(field).is_none() {
                return Ok(Mutation::Skip(false));
            }
            Ok(Mutation::Write(encode_hash(hash)?, true))
        })
    }
}

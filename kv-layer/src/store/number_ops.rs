use super::codec;
use super::data_types::Value;
use super::error::{StoreError, StoreResult};
use super::store_manager::{Mutation, StoreManager};

/// 整数与浮点计数器。不存在的键按 0 处理，整数溢出时回绕
impl StoreManager {
    pub fn get_int(&self, key: &str) -> StoreResult<i64> {
        codec::decode_int(&self.get(key)?)
    }

    pub fn set_int(&self, key: &str, value: i64) -> StoreResult<()> {
        self.set(key, value)
    }

    pub fn increment_int(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.modify(key, |current| {
            let value = match current {
                Some(bytes) => codec::decode_int(bytes)?,
                None => 0,
            }
            .wrapping_add(by);
            Ok(Mutation::Write(codec::encode(&Value::Int(value))?, value))
        })
    }

    pub fn decrement_int(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.increment_int(key, by.wrapping_neg())
    }

    pub fn get_float(&self, key: &str) -> StoreResult<f64> {
        codec::decode_float(&self.get(key)?)
    }

    pub fn set_float(&self, key: &str, value: f64) -> StoreResult<()> {
        self.set(key, value)
    }

    pub fn increment_float(&self, key: &str, by: f64) -> StoreResult<f64> {
        if !by.is_finite() {
            return Err(StoreError::UnsupportedValue(format!("非有限的增量 {}", by)));
        }
        self.modify(key, |current| {
            let value = match current {
                Some(bytes) => codec::decode_float(bytes)?,
                None => 0.0,
            } + by;
            Ok(Mutation::Write(codec::encode(&Value::Float(value))?, value))
        })
    }

    pub fn decrement_float(&self, key: &str, by: f64) -> StoreResult<f64> {
        self.increment_float(key, -by)
    }
}

use log::debug;

use super::codec;
use super::data_types::{List, Value};
use super::error::{StoreError, StoreResult};
use super::store_manager::{Mutation, StoreManager};

/// 列表下标运算，负数下标从尾部计数
pub struct ListHandler;

impl ListHandler {
    /// 读取用的下标：越界时夹到首尾元素，空列表返回 None
    pub fn clamp_index(len: usize, index: i64) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let len = len as i64;
        let resolved = if index < 0 { len + index } else { index };
        Some(resolved.clamp(0, len - 1) as usize)
    }

    /// 写入用的下标：只接受 `[-len, len)`
    pub fn strict_index(len: usize, index: i64) -> Option<usize> {
        let len = len as i64;
        let resolved = if index < 0 { len + index } else { index };
        if (0..len).contains(&resolved) {
            Some(resolved as usize)
        } else {
            None
        }
    }

    /// 插入位置：负数插到最前，超过长度追加到末尾
    pub fn insert_position(len: usize, index: i64) -> usize {
        if index <= 0 {
            0
        } else {
            (index as usize).min(len)
        }
    }

    /// 按字节比较查找第一个匹配元素
    pub fn position(list: &List, item: &[u8]) -> Option<usize> {
        list.items.iter().position(|v| v.as_slice() == item)
    }
}

fn encode_list(list: List) -> StoreResult<Vec<u8>> {
    codec::encode(&Value::List(list))
}

fn out_of_range(key: &str, index: i64, length: usize) -> StoreError {
    StoreError::ListIndexOutOfRange {
        key: key.to_string(),
        index,
        length,
    }
}

#[derive(Clone, Copy)]
enum End {
    Left,
    Right,
}

impl StoreManager {
    pub fn get_list(&self, key: &str) -> StoreResult<List> {
        codec::decode_list(&self.get(key)?)
    }

    /// 整体写入列表，超出上限的部分从头部截掉
    pub fn set_list(&self, key: &str, mut list: List) -> StoreResult<()> {
        list.enforce_limit();
        self.set(key, list)
    }

    pub fn get_list_item(&self, key: &str, index: i64) -> StoreResult<Vec<u8>> {
        let list = self.get_list(key)?;
        let pos = ListHandler::clamp_index(list.len(), index)
            .ok_or_else(|| StoreError::ListEmpty(key.to_string()))?;
        Ok(list.items[pos].clone())
    }

    pub fn set_list_item(&self, key: &str, index: i64, value: impl Into<Vec<u8>>) -> StoreResult<()> {
        let value = value.into();
        self.modify(key, |current| {
            let bytes = current.ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
            let mut list = codec::decode_list(bytes)?;
            if list.is_empty() {
                return Err(StoreError::ListEmpty(key.to_string()));
            }
            let pos = ListHandler::strict_index(list.len(), index)
                .ok_or_else(|| out_of_range(key, index, list.len()))?;
            list.items[pos] = value;
            Ok(Mutation::Write(encode_list(list)?, ()))
        })
    }

    pub fn list_length(&self, key: &str) -> StoreResult<usize> {
        Ok(self.get_list(key)?.len())
    }

    /// 设置列表上限，负数视为 0（不限）。已有元素在下一次增长时才被截断
    pub fn list_limit(&self, key: &str, limit: i64) -> StoreResult<()> {
        self.modify(key, |current| {
            let bytes = current.ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
            let mut list = codec::decode_list(bytes)?;
            list.limit = limit.max(0) as u64;
            Ok(Mutation::Write(encode_list(list)?, ()))
        })
    }

    /// 在 `index` 处插入，列表不存在时创建。返回新长度
    pub fn list_insert(&self, key: &str, index: i64, value: impl Into<Vec<u8>>) -> StoreResult<usize> {
        let value = value.into();
        self.modify(key, |current| {
            let mut list = match current {
                Some(bytes) => codec::decode_list(bytes)?,
                None => List::new(),
            };
            let pos = ListHandler::insert_position(list.len(), index);
            list.items.insert(pos, value);
            list.enforce_limit();
            let len = list.len();
            Ok(Mutation::Write(encode_list(list)?, len))
        })
    }

    /// 追加到末尾，列表不存在时创建。返回新长度
    pub fn list_append(&self, key: &str, value: impl Into<Vec<u8>>) -> StoreResult<usize> {
        let value = value.into();
        self.modify(key, |current| {
            let mut list = match current {
                Some(bytes) => codec::decode_list(bytes)?,
                None => List::new(),
            };
            list.items.push(value);
            list.enforce_limit();
            let len = list.len();
            Ok(Mutation::Write(encode_list(list)?, len))
        })
    }

    /// 弹出一个元素，列表为空时返回 None 且不写回
    fn try_pop(&self, key: &str, end: End) -> StoreResult<Option<Vec<u8>>> {
        self.modify(key, |current| {
            let Some(bytes) = current else {
                return Ok(Mutation::Skip(None));
            };
            let mut list = codec::decode_list(bytes)?;
            let item = match end {
                End::Left if !list.is_empty() => Some(list.items.remove(0)),
                End::Left => None,
                End::Right => list.items.pop(),
            };
            match item {
                Some(item) => Ok(Mutation::Write(encode_list(list)?, Some(item))),
                None => Ok(Mutation::Skip(None)),
            }
        })
    }

    fn pop(&self, key: &str, end: End) -> StoreResult<Vec<u8>> {
        self.try_pop(key, end)?
            .ok_or_else(|| StoreError::ListEmpty(key.to_string()))
    }

    fn pop_blocking(&self, key: &str, end: End, timeout_seconds: i64) -> StoreResult<Vec<u8>> {
        debug!("阻塞弹出 '{}'，超时 {} 秒", key, timeout_seconds);
        self.wait_for(key, timeout_seconds, || self.try_pop(key, end))?
            .ok_or_else(|| StoreError::ListEmpty(key.to_string()))
    }

    pub fn list_pop_left(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.pop(key, End::Left)
    }

    pub fn list_pop_right(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.pop(key, End::Right)
    }

    /// 列表为空时等待元素出现；`timeout_seconds` 不大于 0 时一直等待
    pub fn list_pop_left_blocking(&self, key: &str, timeout_seconds: i64) -> StoreResult<Vec<u8>> {
        self.pop_blocking(key, End::Left, timeout_seconds)
    }

    pub fn list_pop_right_blocking(&self, key: &str, timeout_seconds: i64) -> StoreResult<Vec<u8>> {
        self.pop_blocking(key, End::Right, timeout_seconds)
    }

    /// 第一个等于 `item` 的元素下标，找不到或键不存在返回 -1
    pub fn list_has(&self, key: &str, item: &[u8]) -> StoreResult<i64> {
        let list = match self.get_list(key) {
            Ok(list) => list,
            Err(StoreError::KeyNotFound(_)) => return Ok(-1),
            Err(e) => return Err(e),
        };
        Ok(ListHandler::position(&list, item).map_or(-1, |pos| pos as i64))
    }

    /// 删除 `index` 处的元素并返回它
    pub fn list_delete(&self, key: &str, index: i64) -> StoreResult<Vec<u8>> {
        self.modify(key, |current| {
            let bytes = current.ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
            let mut list = codec::decode_list(bytes)?;
            if list.is_empty() {
                return Err(StoreError::ListEmpty(key.to_string()));
            }
            let pos = ListHandler::strict_index(list.len(), index)
                .ok_or_else(|| out_of_range(key, index, list.len()))?;
            let removed = list.items.remove(pos);
            Ok(Mutation::Write(encode_list(list)?, removed))
        })
    }

    /// 删除第一个等于 `item` 的元素，返回其原下标，找不到返回 -1
    pub fn list_delete_item(&self, key: &str, item: &[u8]) -> StoreResult<i64> {
        self.modify(key, |current| {
            let Some(bytes) = current else {
                return Ok(Mutation::Skip(-1));
            };
            let mut list = codec::decode_list(bytes)?;
            match ListHandler::position(&list, item) {
                Some(pos) => {
                    list.items.remove(pos);
                    Ok(Mutation::Write(encode_list(list)?, pos as i64))
                }
                None => Ok(Mutation::Skip(-1)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_index() {
        assert_eq!(ListHandler::clamp_index(3, 1), Some(1));
        assert_eq!(ListHandler::clamp_index(3, 100), Some(2));
        assert_eq!(ListHandler::clamp_index(3, -1), Some(2));
        assert_eq!(ListHandler::clamp_index(3, -3), Some(0));
        assert_eq!(ListHandler::clamp_index(3, -100), Some(0));
        assert_eq!(ListHandler::clamp_index(0, 0), None);
    }

    #[test]
    fn test_strict_index() {
        assert_eq!(ListHandler::strict_index(3, 2), Some(2));
        assert_eq!(ListHandler::strict_index(3, 3), None);
        assert_eq!(ListHandler::strict_index(3, -3), Some(0));
        assert_eq!(ListHandler::strict_index(3, -4), None);
    }

    #[test]
    fn test_insert_position() {
        assert_eq!(ListHandler::insert_position(3, -5), 0);
        assert_eq!(ListHandler::insert_position(3, 0), 0);
        assert_eq!(ListHandler::insert_position(3, 1), 1);
        assert_eq!(ListHandler::insert_position(3, 10), 3);
    }
}

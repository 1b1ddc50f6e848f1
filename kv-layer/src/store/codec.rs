//! 值编解码
//!
//! 字节串原样存储；整数、浮点、列表和哈希编码为两字节头部加 bincode 消息体。
//! 头部与枚举标签一起用来识别写入时的形态，不匹配时返回 `TypeMismatch`。

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::data_types::{Hash, List, Shape, Value};
use super::error::{StoreError, StoreResult};

const FORMAT_MARKER: u8 = 0xF5;
const FORMAT_VERSION: u8 = 0x01;
const HEADER_LEN: usize = 2;

/// 全键空间哨兵，作为 range_end 表示“起始键之后的所有键”
pub const ZERO_BYTE: &[u8] = &[0];

#[derive(Serialize, Deserialize)]
enum Payload {
    Int(i64),
    Float(f64),
    List { items: Vec<Vec<u8>>, limit: u64 },
    Hash(BTreeMap<String, Vec<u8>>),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new().reject_trailing_bytes()
}

pub fn encode(value: &Value) -> StoreResult<Vec<u8>> {
    let payload = match value {
        Value::Bytes(bytes) => return Ok(bytes.clone()),
        Value::Int(i) => Payload::Int(*i),
        Value::Float(f) => Payload::Float(*f),
        Value::List(list) => Payload::List {
            items: list.items.clone(),
            limit: list.limit,
        },
        Value::Hash(hash) => Payload::Hash(hash.clone()),
    };

    let mut buf = vec![FORMAT_MARKER, FORMAT_VERSION];
    options().serialize_into(&mut buf, &payload)?;
    Ok(buf)
}

pub fn decode(bytes: &[u8], shape: Shape) -> StoreResult<Value> {
    let mismatch = StoreError::TypeMismatch {
        expected: shape.type_name(),
    };

    if shape == Shape::Bytes {
        return Ok(Value::Bytes(bytes.to_vec()));
    }
    if bytes.len() < HEADER_LEN || bytes[0] != FORMAT_MARKER || bytes[1] != FORMAT_VERSION {
        return Err(mismatch);
    }

    let payload: Payload = options()
        .deserialize(&bytes[HEADER_LEN..])
        .map_err(|_| mismatch.clone())?;

    match (shape, payload) {
        (Shape::Int, Payload::Int(i)) => Ok(Value::Int(i)),
        (Shape::Float, Payload::Float(f)) => Ok(Value::Float(f)),
        (Shape::List, Payload::List { items, limit }) => Ok(Value::List(List { items, limit })),
        (Shape::Hash, Payload::Hash(hash)) => Ok(Value::Hash(hash)),
        _ => Err(mismatch),
    }
}

pub fn decode_int(bytes: &[u8]) -> StoreResult<i64> {
    match decode(bytes, Shape::Int)? {
        Value::Int(i) => Ok(i),
        _ => Err(StoreError::TypeMismatch { expected: "int" }),
    }
}

pub fn decode_float(bytes: &[u8]) -> StoreResult<f64> {
    match decode(bytes, Shape::Float)? {
        Value::Float(f) => Ok(f),
        _ => Err(StoreError::TypeMismatch { expected: "float" }),
    }
}

pub fn decode_list(bytes: &[u8]) -> StoreResult<List> {
    match decode(bytes, Shape::List)? {
        Value::List(list) => Ok(list),
        _ => Err(StoreError::TypeMismatch { expected: "list" }),
    }
}

pub fn decode_hash(bytes: &[u8]) -> StoreResult<Hash> {
    match decode(bytes, Shape::Hash)? {
        Value::Hash(hash) => Ok(hash),
        _ => Err(StoreError::TypeMismatch { expected: "hash" }),
    }
}

/// 大于所有以 `prefix` 开头的键的最小键。
/// 全部为 0xFF（或为空）时返回零字节哨兵。
pub fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return end;
        }
    }
    ZERO_BYTE.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_pass_through() {
        let encoded = encode(&Value::from("hello")).unwrap();
        assert_eq!(encoded, b"hello".to_vec());
        assert_eq!(decode(&encoded, Shape::Bytes).unwrap(), Value::from("hello"));
    }

    #[test]
    fn test_structured_values() {
        let mut list = List::from_items(vec!["a", "b"]);
        list.limit = 3;
        let encoded = encode(&Value::List(list.clone())).unwrap();
        assert_eq!(&encoded[..2], &[FORMAT_MARKER, FORMAT_VERSION]);
        assert_eq!(decode_list(&encoded).unwrap(), list);

        let encoded = encode(&Value::Float(-2.5)).unwrap();
        assert_eq!(decode_float(&encoded).unwrap(), -2.5);
    }

    #[test]
    fn test_shape_mismatch() {
        let int = encode(&Value::Int(7)).unwrap();
        assert_eq!(
            decode_list(&int),
            Err(StoreError::TypeMismatch { expected: "list" })
        );
        assert!(decode_float(&int).is_err());
        // 普通字节串没有头部
        assert!(decode_int(b"42").is_err());
        assert!(decode_hash(&[]).is_err());
    }

    #[test]
    fn test_truncated_and_trailing_payload() {
        let mut encoded = encode(&Value::from(vec!["abc".to_string()])).unwrap();
        let truncated = &encoded[..encoded.len() - 1];
        assert!(decode_list(truncated).is_err());

        encoded.push(0);
        assert!(decode_list(&encoded).is_err());
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"key"), b"kez".to_vec());
        assert_eq!(prefix_upper_bound(&[b'a', 0xFF]), b"b".to_vec());
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), ZERO_BYTE.to_vec());
        assert_eq!(prefix_upper_bound(b""), ZERO_BYTE.to_vec());
    }
}

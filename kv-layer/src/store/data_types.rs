use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::error::{StoreError, StoreResult};

/// 哈希类型：字段名到字节串，字段按字典序排列
pub type Hash = BTreeMap<String, Vec<u8>>;

/// 列表类型，`limit` 为 0 表示不限长度
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List {
    pub items: Vec<Vec<u8>>,
    pub limit: u64,
}

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        List {
            items: items.into_iter().map(Into::into).collect(),
            limit: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 超出上限时从头部丢弃元素，只保留最后 `limit` 个
    pub fn enforce_limit(&mut self) {
        let limit = self.limit as usize;
        if limit > 0 && self.items.len() > limit {
            let overflow = self.items.len() - limit;
            self.items.drain(..overflow);
        }
    }
}

/// 值的逻辑形态，解码时用于校验
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Bytes,
    Int,
    Float,
    List,
    Hash,
}

impl Shape {
    pub fn type_name(&self) -> &'static str {
        match self {
            Shape::Bytes => "bytes",
            Shape::Int => "int",
            Shape::Float => "float",
            Shape::List => "list",
            Shape::Hash => "hash",
        }
    }
}

/// 存储层支持的值类型
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 原样存储的字节串
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    List(List),
    Hash(Hash),
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::Bytes(_) => Shape::Bytes,
            Value::Int(_) => Shape::Int,
            Value::Float(_) => Shape::Float,
            Value::List(_) => Shape::List,
            Value::Hash(_) => Shape::Hash,
        }
    }

    /// 获取数据类型名称
    pub fn type_name(&self) -> &'static str {
        self.shape().type_name()
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Bytes(value.into_bytes())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bytes(vec![u8::from(value)])
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

int_value!(i8, i16, i32, i64);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

/// 时长按纳秒存为整数，超出 i64 范围时饱和
impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Int(i64::try_from(value.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Value::List(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(List::from_items(value))
    }
}

impl From<Vec<Vec<u8>>> for Value {
    fn from(value: Vec<Vec<u8>>) -> Self {
        Value::List(List::from_items(value))
    }
}

impl From<Hash> for Value {
    fn from(value: Hash) -> Self {
        Value::Hash(value)
    }
}

impl<V: Into<Vec<u8>>> From<HashMap<String, V>> for Value {
    fn from(value: HashMap<String, V>) -> Self {
        Value::Hash(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// JSON 标量、字符串数组与字符串对象之外的形态都会被拒绝
impl TryFrom<serde_json::Value> for Value {
    type Error = StoreError;

    fn try_from(value: serde_json::Value) -> StoreResult<Self> {
        use serde_json::Value as Json;

        match value {
            Json::String(s) => Ok(s.into()),
            Json::Bool(b) => Ok(b.into()),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| StoreError::UnsupportedValue(n.to_string())),
            },
            Json::Array(items) => items
                .into_iter()
                .map(json_bytes)
                .collect::<StoreResult<Vec<_>>>()
                .map(Value::from),
            Json::Object(fields) => fields
                .into_iter()
                .map(|(field, v)| json_bytes(v).map(|b| (field, b)))
                .collect::<StoreResult<Hash>>()
                .map(Value::Hash),
            Json::Null => Err(StoreError::UnsupportedValue("null".to_string())),
        }
    }
}

fn json_bytes(value: serde_json::Value) -> StoreResult<Vec<u8>> {
    match value {
        serde_json::Value::String(s) => Ok(s.into_bytes()),
        other => Err(StoreError::UnsupportedValue(format!(
            "列表和哈希只能包含字符串，收到 {}",
            other
        ))),
    }
}

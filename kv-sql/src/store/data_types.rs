use std::fmt;
use serde::{Deserialize, Serialize};
use super::error::{StoreError, StoreResult};

/// 存储系统中支持的数据类型，数值即键表中 `type` 列的取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 无类型（键不存在）
    None,
    /// 字符串类型
    String,
    /// 列表类型
    List,
    /// 集合类型
    Set,
    /// 哈希表类型
    Hash,
    /// 有序集合类型
    SortedSet,
}

impl DataType {
    /// 获取数据类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::String => "string",
            DataType::List => "list",
            DataType::Set => "set",
            DataType::Hash => "hash",
            DataType::SortedSet => "zset",
        }
    }

    pub(crate) fn code(&self) -> i64 {
        match self {
            DataType::None => 0,
            DataType::String => 1,
            DataType::List => 2,
            DataType::Set => 3,
            DataType::Hash => 4,
            DataType::SortedSet => 5,
        }
    }

    pub(crate) fn from_code(code: i64) -> DataType {
        match code {
            1 => DataType::String,
            2 => DataType::List,
            3 => DataType::Set,
            4 => DataType::Hash,
            5 => DataType::SortedSet,
            _ => DataType::None,
        }
    }

    /// 该类型的元素所在的数据表
    pub(crate) fn table(&self) -> Option<&'static str> {
        match self {
            DataType::None => None,
            DataType::String => Some("rstring"),
            DataType::List => Some("rlist"),
            DataType::Set => Some("rset"),
            DataType::Hash => Some("rhash"),
            DataType::SortedSet => Some("rzset"),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// 存储的值（字符串、哈希值、列表/集合元素），按原始字节保存
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: Vec<u8>) -> Self {
        Value(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按 UTF-8 解释为字符串，非法字节替换为 U+FFFD
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// 解析为整数，失败返回 `ValueType`
    pub fn to_i64(&self) -> StoreResult<i64> {
        std::str::from_utf8(&self.0)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(StoreError::ValueType)
    }

    /// 解析为浮点数，失败返回 `ValueType`
    pub fn to_f64(&self) -> StoreResult<f64> {
        std::str::from_utf8(&self.0)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|f| !f.is_nan())
            .ok_or(StoreError::ValueType)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(s.into_bytes())
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value(b)
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value(n.to_string().into_bytes())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value(format_float(n).into_bytes())
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

/// 浮点数的文本形式：整数值不带小数点
pub(crate) fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e17 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// 键的元信息，对应键表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub(crate) id: i64,
    /// 键名
    pub name: String,
    /// 数据类型
    pub data_type: DataType,
    /// 版本号，每次修改递增
    pub version: i64,
    /// 绝对过期时间（Unix毫秒），`None` 表示永不过期
    pub expire_at: Option<i64>,
    /// 最后修改时间（Unix毫秒）
    pub mtime: i64,
    /// 元素数量
    pub len: i64,
}

impl Key {
    /// 相对 `now` 的剩余生存时间（毫秒），永不过期返回 `None`
    pub fn ttl(&self, now: i64) -> Option<i64> {
        self.expire_at.map(|at| (at - now).max(0))
    }

    /// 在 `now` 时刻是否仍然有效
    pub fn is_live(&self, now: i64) -> bool {
        match self.expire_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

/// 有序集合中的元素及其分数
#[derive(Debug, Clone, PartialEq)]
pub struct ZItem {
    pub elem: Value,
    pub score: f64,
}

impl ZItem {
    pub fn new(elem: impl Into<Value>, score: f64) -> Self {
        ZItem {
            elem: elem.into(),
            score,
        }
    }
}

/// 哈希表中的字段及其值
#[derive(Debug, Clone, PartialEq)]
pub struct HashItem {
    pub field: String,
    pub value: Value,
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// 点位声明的数据类型。
///
/// 配置由外部提供，不认识的类型名保留在 `Other` 中，读取时按点位失败处理而不是反序列化失败。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Other(String),
}

impl DataType {
    /// 规范名称（序列化输出使用）。
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Bool => "bool",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
            DataType::Other(name) => name.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DataType::Other(_))
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" | "bit" | "coil" => DataType::Bool,
            "int16" | "short" | "i16" => DataType::Int16,
            "uint16" | "ushort" | "u16" | "word" => DataType::UInt16,
            "int32" | "int" | "i32" => DataType::Int32,
            "uint32" | "uint" | "u32" | "dword" => DataType::UInt32,
            "int64" | "long" | "i64" => DataType::Int64,
            "uint64" | "ulong" | "u64" => DataType::UInt64,
            "float32" | "float" | "real" | "f32" => DataType::Float32,
            "float64" | "double" | "f64" => DataType::Float64,
            "string" | "str" => DataType::String,
            _ => DataType::Other(value),
        }
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        DataType::from(value.to_string())
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 多字节数值的字节序（A 为最高字节）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ByteOrder {
    /// 大端
    #[default]
    #[serde(alias = "big_endian", alias = "BigEndian")]
    Abcd,
    /// 字内字节交换
    Badc,
    /// 字交换
    Cdab,
    /// 小端
    #[serde(alias = "little_endian", alias = "LittleEndian")]
    Dcba,
}

/// 点位值（与 `DataType` 一一对应）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl PointValue {
    /// 值对应的数据类型。
    pub fn data_type(&self) -> DataType {
        match self {
            PointValue::Bool(_) => DataType::Bool,
            PointValue::I16(_) => DataType::Int16,
            PointValue::U16(_) => DataType::UInt16,
            PointValue::I32(_) => DataType::Int32,
            PointValue::U32(_) => DataType::UInt32,
            PointValue::I64(_) => DataType::Int64,
            PointValue::U64(_) => DataType::UInt64,
            PointValue::F32(_) => DataType::Float32,
            PointValue::F64(_) => DataType::Float64,
            PointValue::String(_) => DataType::String,
        }
    }

    pub fn matches(&self, data_type: &DataType) -> bool {
        &self.data_type() == data_type
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Bool(v) => write!(f, "{}", v),
            PointValue::I16(v) => write!(f, "{}", v),
            PointValue::U16(v) => write!(f, "{}", v),
            PointValue::I32(v) => write!(f, "{}", v),
            PointValue::U32(v) => write!(f, "{}", v),
            PointValue::I64(v) => write!(f, "{}", v),
            PointValue::U64(v) => write!(f, "{}", v),
            PointValue::F32(v) => write!(f, "{}", v),
            PointValue::F64(v) => write!(f, "{}", v),
            PointValue::String(v) => f.write_str(v),
        }
    }
}

/// 当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

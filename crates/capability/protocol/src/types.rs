//! 驱动侧请求类型定义

use domain::{ByteOrder, DataType, Point};

/// 已校验的驱动值类型
///
/// 由点位的 `DataType` + `length` 得出；字符串必须带长度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// 定长字符串（字节数）
    String { length: u16 },
}

impl ValueKind {
    /// 校验点位声明，失败时返回可直接放入点位结果的描述。
    pub fn for_point(point: &Point) -> Result<Self, String> {
        let kind = match &point.data_type {
            DataType::Bool => ValueKind::Bool,
            DataType::Int16 => ValueKind::I16,
            DataType::UInt16 => ValueKind::U16,
            DataType::Int32 => ValueKind::I32,
            DataType::UInt32 => ValueKind::U32,
            DataType::Int64 => ValueKind::I64,
            DataType::UInt64 => ValueKind::U64,
            DataType::Float32 => ValueKind::F32,
            DataType::Float64 => ValueKind::F64,
            DataType::String => match point.length {
                Some(length) if length > 0 => ValueKind::String { length },
                Some(_) => {
                    return Err(format!(
                        "point {} has dataType string with zero length",
                        point.label
                    ));
                }
                None => {
                    return Err(format!(
                        "point {} has dataType string but no length configured",
                        point.label
                    ));
                }
            },
            DataType::Other(name) => {
                return Err(format!(
                    "unsupported dataType '{}' for point {}",
                    name, point.label
                ));
            }
        };
        Ok(kind)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ValueKind::Bool => DataType::Bool,
            ValueKind::I16 => DataType::Int16,
            ValueKind::U16 => DataType::UInt16,
            ValueKind::I32 => DataType::Int32,
            ValueKind::U32 => DataType::UInt32,
            ValueKind::I64 => DataType::Int64,
            ValueKind::U64 => DataType::UInt64,
            ValueKind::F32 => DataType::Float32,
            ValueKind::F64 => DataType::Float64,
            ValueKind::String { .. } => DataType::String,
        }
    }
}

/// 单点读写请求
#[derive(Debug, Clone, PartialEq)]
pub struct PointRequest {
    /// 点位地址（协议相关格式）
    pub address: String,
    /// 站号，缺省时由驱动使用协议默认站号
    pub station_no: Option<u8>,
    pub kind: ValueKind,
    /// 字节序，缺省时由驱动使用协议默认字节序
    pub byte_order: Option<ByteOrder>,
}

impl PointRequest {
    pub fn for_point(point: &Point) -> Result<Self, String> {
        Ok(Self {
            address: point.address.clone(),
            station_no: point.station_no,
            kind: ValueKind::for_point(point)?,
            byte_order: point.byte_order,
        })
    }
}

//! Modbus 地址解析与寄存器编解码

use crate::error::ProtocolError;
use crate::types::ValueKind;
use domain::{ByteOrder, PointValue};

/// Modbus 数据区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterTable {
    /// 线圈 (0x)
    Coil,
    /// 离散输入 (1x)
    DiscreteInput,
    /// 输入寄存器 (3x)
    InputRegister,
    /// 保持寄存器 (4x)
    HoldingRegister,
}

impl RegisterTable {
    pub fn is_bit_table(&self) -> bool {
        matches!(self, RegisterTable::Coil | RegisterTable::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterTable::Coil | RegisterTable::HoldingRegister)
    }
}

/// 解析后的寄存器地址（协议偏移，从 0 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddress {
    pub table: RegisterTable,
    pub offset: u16,
}

/// 解析点位地址
///
/// 支持三种写法：
/// - `hr:100` / `ir:100` / `co:100` / `di:100`：直接给出协议偏移
/// - `40001` / `400001`：Modicon 写法，首位为数据区，其余为 1 起始编号
/// - `100`：保持寄存器编号，`zero_based` 为假时按 1 起始换算
pub fn parse_address(address: &str, zero_based: bool) -> Result<RegisterAddress, ProtocolError> {
    let address = address.trim();
    if let Some((prefix, rest)) = address.split_once(':') {
        let table = match prefix.trim().to_ascii_lowercase().as_str() {
            "co" | "coil" => RegisterTable::Coil,
            "di" => RegisterTable::DiscreteInput,
            "ir" => RegisterTable::InputRegister,
            "hr" => RegisterTable::HoldingRegister,
            other => {
                return Err(ProtocolError::Address(format!(
                    "unknown register table '{}' in {}",
                    other, address
                )));
            }
        };
        let offset = rest
            .trim()
            .parse::<u16>()
            .map_err(|_| ProtocolError::Address(format!("invalid offset in {}", address)))?;
        return Ok(RegisterAddress { table, offset });
    }

    if address.is_empty() || !address.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::Address(format!("invalid address '{}'", address)));
    }

    let (table, number, one_based) = if address.len() >= 5 {
        let table = match address.as_bytes()[0] {
            b'0' => RegisterTable::Coil,
            b'1' => RegisterTable::DiscreteInput,
            b'3' => RegisterTable::InputRegister,
            b'4' => RegisterTable::HoldingRegister,
            _ => {
                return Err(ProtocolError::Address(format!(
                    "unknown register table in {}",
                    address
                )));
            }
        };
        (table, parse_number(&address[1..], address)?, true)
    } else {
        (
            RegisterTable::HoldingRegister,
            parse_number(address, address)?,
            !zero_based,
        )
    };

    let offset = if one_based {
        number.checked_sub(1).ok_or_else(|| {
            ProtocolError::Address(format!("address {} is invalid for one-based numbering", address))
        })?
    } else {
        number
    };
    let offset = u16::try_from(offset)
        .map_err(|_| ProtocolError::Address(format!("address {} out of range", address)))?;
    Ok(RegisterAddress { table, offset })
}

fn parse_number(digits: &str, address: &str) -> Result<u32, ProtocolError> {
    digits
        .parse::<u32>()
        .map_err(|_| ProtocolError::Address(format!("invalid address '{}'", address)))
}

/// 值类型占用的寄存器数量
pub fn register_count(kind: ValueKind) -> u16 {
    match kind {
        ValueKind::Bool | ValueKind::I16 | ValueKind::U16 => 1,
        ValueKind::I32 | ValueKind::U32 | ValueKind::F32 => 2,
        ValueKind::I64 | ValueKind::U64 | ValueKind::F64 => 4,
        ValueKind::String { length } => length.div_ceil(2),
    }
}

/// 按字节序重排寄存器字节。变换是自反的，编码和解码共用。
fn reorder(registers: &[u16], order: ByteOrder) -> Vec<u8> {
    let mut words: Vec<[u8; 2]> = registers.iter().map(|r| r.to_be_bytes()).collect();
    match order {
        ByteOrder::Abcd => {}
        ByteOrder::Cdab => words.reverse(),
        ByteOrder::Badc => words.iter_mut().for_each(|w| w.swap(0, 1)),
        ByteOrder::Dcba => {
            words.reverse();
            words.iter_mut().for_each(|w| w.swap(0, 1));
        }
    }
    words.concat()
}

fn swap_only(order: ByteOrder) -> ByteOrder {
    match order {
        ByteOrder::Badc | ByteOrder::Dcba => ByteOrder::Badc,
        ByteOrder::Abcd | ByteOrder::Cdab => ByteOrder::Abcd,
    }
}

fn to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], *chunk.get(1).unwrap_or(&0)]))
        .collect()
}

/// 解析寄存器数据
pub fn decode(
    registers: &[u16],
    kind: ValueKind,
    order: ByteOrder,
) -> Result<PointValue, ProtocolError> {
    let needed = register_count(kind) as usize;
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {} registers for {}, got {}",
            needed,
            kind.data_type(),
            registers.len()
        )));
    }
    let registers = &registers[..needed];

    if let ValueKind::String { length } = kind {
        let bytes = reorder(registers, swap_only(order));
        let bytes = &bytes[..(length as usize).min(bytes.len())];
        let text = String::from_utf8_lossy(bytes);
        return Ok(PointValue::String(
            text.trim_end_matches(['\0', ' ']).to_string(),
        ));
    }

    let bytes = reorder(registers, order);
    let value = match kind {
        ValueKind::Bool => PointValue::Bool(registers[0] != 0),
        ValueKind::I16 => PointValue::I16(i16::from_be_bytes([bytes[0], bytes[1]])),
        ValueKind::U16 => PointValue::U16(u16::from_be_bytes([bytes[0], bytes[1]])),
        ValueKind::I32 => PointValue::I32(i32::from_be_bytes(array4(&bytes))),
        ValueKind::U32 => PointValue::U32(u32::from_be_bytes(array4(&bytes))),
        ValueKind::F32 => PointValue::F32(f32::from_be_bytes(array4(&bytes))),
        ValueKind::I64 => PointValue::I64(i64::from_be_bytes(array8(&bytes))),
        ValueKind::U64 => PointValue::U64(u64::from_be_bytes(array8(&bytes))),
        ValueKind::F64 => PointValue::F64(f64::from_be_bytes(array8(&bytes))),
        ValueKind::String { .. } => unreachable!("strings handled above"),
    };
    Ok(value)
}

/// 编码为寄存器数据
pub fn encode(
    value: &PointValue,
    kind: ValueKind,
    order: ByteOrder,
) -> Result<Vec<u16>, ProtocolError> {
    let bytes: Vec<u8> = match (kind, value) {
        (ValueKind::Bool, PointValue::Bool(v)) => return Ok(vec![u16::from(*v)]),
        (ValueKind::I16, PointValue::I16(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::U16, PointValue::U16(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::I32, PointValue::I32(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::U32, PointValue::U32(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::F32, PointValue::F32(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::I64, PointValue::I64(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::U64, PointValue::U64(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::F64, PointValue::F64(v)) => v.to_be_bytes().to_vec(),
        (ValueKind::String { length }, PointValue::String(v)) => {
            if v.len() > length as usize {
                return Err(ProtocolError::DataParse(format!(
                    "string of {} bytes exceeds length {}",
                    v.len(),
                    length
                )));
            }
            let mut bytes = v.as_bytes().to_vec();
            bytes.resize(register_count(kind) as usize * 2, 0);
            return Ok(to_words(&reorder(&to_words(&bytes), swap_only(order))));
        }
        (kind, value) => {
            return Err(ProtocolError::DataParse(format!(
                "value {} does not match {}",
                value,
                kind.data_type()
            )));
        }
    };
    Ok(to_words(&reorder(&to_words(&bytes), order)))
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

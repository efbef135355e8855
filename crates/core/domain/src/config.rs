//! 协议配置快照。

use crate::data::{ByteOrder, DataType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 物理接口类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Serial,
    #[default]
    #[serde(alias = "tcp", alias = "network")]
    Ethernet,
}

/// 串口校验位。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// 串口参数。
///
/// 同时作为共享串口的结构化键：五个字段完全相同即视为同一物理连接。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// 寻址相关的协议级选项。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressingOptions {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub serial: Option<SerialSettings>,
    /// 点位未指定站号时使用的默认站号
    #[serde(default)]
    pub station_no: Option<u8>,
    /// 地址是否从 0 开始（否则按 1 起始换算）
    #[serde(default)]
    pub zero_based: bool,
    /// 点位未指定字节序时使用的默认字节序
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
}

/// 单个点位。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub label: String,
    pub address: String,
    pub data_type: DataType,
    #[serde(default)]
    pub length: Option<u16>,
    #[serde(default)]
    pub station_no: Option<u8>,
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    #[serde(default)]
    pub instrument_type: Option<String>,
}

impl Point {
    pub fn new(label: impl Into<String>, address: impl Into<String>, data_type: DataType) -> Self {
        Self {
            label: label.into(),
            address: address.into(),
            data_type,
            length: None,
            station_no: None,
            byte_order: None,
            instrument_type: None,
        }
    }

    pub fn with_length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_station(mut self, station_no: u8) -> Self {
        self.station_no = Some(station_no);
        self
    }
}

/// 设备：归属于唯一的协议配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub equipment_id: String,
    #[serde(default)]
    pub points: Vec<Point>,
}

/// 协议配置快照（不可变）。
///
/// 一个采集循环在其整个生命周期内只绑定一个快照；配置变化时旧循环停止、新循环启动。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    pub id: String,
    #[serde(default)]
    pub interface_kind: InterfaceKind,
    pub protocol_type: String,
    /// 采集周期（毫秒），0 表示未配置，由配置加载方补默认值
    #[serde(default)]
    pub collect_cycle_ms: u64,
    #[serde(default)]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub receive_timeout_ms: u64,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub addressing: AddressingOptions,
}

impl ProtocolConfig {
    pub fn collect_cycle(&self) -> Duration {
        Duration::from_millis(self.collect_cycle_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// 串口参数（仅当接口为串口且配置了串口参数时）。
    pub fn serial_settings(&self) -> Option<&SerialSettings> {
        match self.interface_kind {
            InterfaceKind::Serial => self.addressing.serial.as_ref(),
            InterfaceKind::Ethernet => None,
        }
    }

    pub fn total_points(&self) -> usize {
        self.devices.iter().map(|device| device.points.len()).sum()
    }

    /// 按标签查找点位，其次按地址。
    pub fn find_point(&self, label: &str, address: Option<&str>) -> Option<&Point> {
        let points = || self.devices.iter().flat_map(|device| device.points.iter());
        points()
            .find(|point| !label.is_empty() && point.label == label)
            .or_else(|| {
                let address = address?;
                points().find(|point| point.address == address)
            })
    }
}

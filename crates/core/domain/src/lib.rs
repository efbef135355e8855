//! 网关领域模型：协议配置快照、点位值、三级采集结果与写入任务。

pub mod config;
pub mod data;
pub mod result;
pub mod task;

pub use config::{
    AddressingOptions, Device, InterfaceKind, Parity, Point, ProtocolConfig, SerialSettings,
};
pub use data::{ByteOrder, DataType, PointValue, now_epoch_ms};
pub use result::{DeviceResult, PointResult, ProtocolResult};
pub use task::{WriteReport, WriteTarget, WriteTask};

//! # 协议通信能力模块
//!
//! 为采集调度提供统一的驱动抽象：
//! - **Driver**：传输层驱动（连接、单点读写、关闭）
//! - **DriverRegistry**：协议类型标签 → 驱动工厂
//! - **PointExecutor**：类型化单点读写，结果统一为 `PointResult`
//! - **ModbusDriver**：Modbus TCP / RTU 实现，RTU 共享串口链路
//!
//! ## 架构设计
//!
//! ```text
//! ProtocolConfig (protocol_type)
//!       │
//!       ▼
//! DriverRegistry ──create──▶ Arc<dyn Driver>
//!                                 │
//!                                 ▼
//!                           PointExecutor ──▶ PointResult / WriteOutcome
//! ```
//!
//! ## 故障分类
//!
//! 所有驱动错误通过 [`ProtocolError::kind`] 归类，链路级错误才会升级为设备级失败。
//!
//! ## 点位地址
//!
//! ```text
//! hr:100 / ir:100 / co:100 / di:100   协议偏移
//! 40001 / 300010                      Modicon 编号
//! 100                                 保持寄存器编号（按 zeroBased 换算）
//! ```

pub mod codec;
mod driver;
mod error;
mod executor;
mod modbus;
mod registry;
mod serial;
mod types;

pub use driver::Driver;
pub use error::{FaultKind, ProtocolError};
pub use executor::{coerce, PointExecutor, WriteOutcome};
pub use modbus::ModbusDriver;
pub use registry::{DriverFactory, DriverRegistry, MODBUS_RTU_TAGS, MODBUS_TCP_TAGS};
pub use serial::{SerialLine, SerialLines};
pub use types::{PointRequest, ValueKind};

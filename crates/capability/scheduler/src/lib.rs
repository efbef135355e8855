//! # 采集调度模块
//!
//! - **ProtocolSupervisor**：每个协议一个可取消的采集循环，负责驱动生命周期与结果发布
//! - **SerialBusArbiter**：共享串口的读写仲裁，写队列优先
//! - **PointCoordinator**：点位粒度的写优先协调
//! - **AccessRouter**：按协议配置选择直接访问或共享串口路径
//!
//! ## 采集周期
//!
//! ```text
//! for device in config.devices:
//!     driver = registry.create()        // 懒创建，按协议缓存
//!     driver.connect()                  // 失败：设备全部点位失败，销毁驱动
//!     access.read_device()              // 链路错误：同上；其余错误只影响该点位
//! all points failed → 销毁驱动
//! publish(ProtocolResult) → sleep(collect_cycle)
//! ```

mod access;
mod arbiter;
mod coordinator;
mod error;
mod publisher;
mod supervisor;

pub use access::{AccessPath, AccessRouter, DeviceRead, DirectAccess, SerialArbitration};
pub use arbiter::{BusHandle, ReadBatch, SerialBusArbiter, WriteBatch};
pub use coordinator::PointCoordinator;
pub use error::SchedulerError;
pub use publisher::{NoopPublisher, ResultPublisher};
pub use supervisor::{ProtocolState, ProtocolSupervisor, SupervisorSettings};

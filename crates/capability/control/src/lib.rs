//! 写入控制链路
//!
//! - `dispatcher`：全局单消费者写入队列（暂停目标协议 → 写入 → 恢复）
//! - `mqtt`：结果发布与写入命令接入

mod dispatcher;
mod mqtt;

pub use dispatcher::WriteDispatcher;
pub use mqtt::{MqttConfig, MqttPublisher, parse_command, qos_from_u8, spawn_command_listener};

/// 控制链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("write dispatcher closed")]
    Closed,
    #[error("payload error: {0}")]
    Payload(String),
}

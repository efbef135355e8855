//! 调度错误类型定义

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// 同一协议已有运行中的采集循环
    #[error("protocol {0} is already running")]
    AlreadyRunning(String),

    /// 协议类型没有注册驱动：配置问题，不创建循环
    #[error("protocol {id}: no driver registered for type '{protocol_type}'")]
    UnsupportedProtocol { id: String, protocol_type: String },

    #[error("invalid serial arbitration mode '{0}'")]
    InvalidArbitration(String),
}

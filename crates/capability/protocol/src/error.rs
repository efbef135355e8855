//! 协议错误类型定义

/// 故障分类：决定错误在点位 / 设备 / 协议之间的传播范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// 链路无法建立或已断开：销毁驱动，当前设备失败
    Connection,
    /// 点位配置驱动无法执行：仅该点位失败
    Unsupported,
    /// 超时、报文异常等：仅该点位失败，下个周期即重试
    Transient,
}

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 协议级配置错误（主机、串口参数等）
    #[error("config error: {0}")]
    Config(String),

    /// 点位地址错误
    #[error("address error: {0}")]
    Address(String),

    /// 驱动不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 驱动已关闭
    #[error("driver closed")]
    Closed,
}

impl ProtocolError {
    pub fn kind(&self) -> FaultKind {
        match self {
            ProtocolError::Connection(_)
            | ProtocolError::Io(_)
            | ProtocolError::Config(_)
            | ProtocolError::Closed => FaultKind::Connection,
            ProtocolError::Address(_) | ProtocolError::Unsupported(_) => FaultKind::Unsupported,
            ProtocolError::Modbus(_) | ProtocolError::DataParse(_) | ProtocolError::Timeout(_) => {
                FaultKind::Transient
            }
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == FaultKind::Connection
    }
}

//! 驱动抽象

use crate::error::ProtocolError;
use crate::types::PointRequest;
use async_trait::async_trait;
use domain::PointValue;

/// 传输层驱动
///
/// 一个实例只服务一个协议配置，由采集监督器独占持有；写入任务只借用、不销毁。
/// 销毁后不再复用，需要时由注册表重新创建。
#[async_trait]
pub trait Driver: Send + Sync {
    /// 驱动声明的协议类型
    fn protocol_type(&self) -> &str;

    /// 建立连接；已连接时直接返回，可重复调用。
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// 读取单个点位，返回值的类型与 `request.kind` 一致。
    async fn read(&self, request: &PointRequest) -> Result<PointValue, ProtocolError>;

    /// 写入单个点位。
    async fn write(&self, request: &PointRequest, value: &PointValue) -> Result<(), ProtocolError>;

    /// 释放连接。
    async fn close(&self);
}

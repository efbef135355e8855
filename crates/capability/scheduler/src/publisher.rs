//! 结果发布接口

use async_trait::async_trait;

/// 结果发布者
///
/// 每个协议每周期调用一次（采集结果），每个写入任务调用一次（执行回显）。
/// 返回 `false` 表示发布失败，调用方只记录日志，不影响调度。
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool;
}

/// 丢弃所有结果（未启用 MQTT 时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl ResultPublisher for NoopPublisher {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> bool {
        true
    }
}

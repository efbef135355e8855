//! 点位级写优先协调
//!
//! 每个共享连接一把门锁。持锁方在每次点位读取前清空该连接的待写队列；
//! 没有读取进行时，提交写入的一方自己持锁清空，写入不必等到下个采集周期。

use crate::access::{AccessPath, DeviceRead, pace};
use async_trait::async_trait;
use domain::{Device, Point, PointResult};
use gw_protocol::{Driver, PointExecutor, ProtocolError, WriteOutcome};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct PendingWrite {
    driver: Arc<dyn Driver>,
    point: Point,
    value: Value,
    reply: oneshot::Sender<WriteOutcome>,
}

#[derive(Default)]
pub struct PointCoordinator {
    gate: Mutex<()>,
    pending: StdMutex<VecDeque<PendingWrite>>,
}

impl PointCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 待执行的写入数量
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_pending(&self) -> Option<PendingWrite> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// 执行全部待写；调用方必须持有门锁
    async fn drain(&self) {
        while let Some(write) = self.next_pending() {
            let outcome = PointExecutor::write(write.driver.as_ref(), &write.point, &write.value).await;
            if !outcome.ok {
                warn!(
                    target: "gateway.coordinator",
                    label = %write.point.label,
                    error = outcome.message.as_deref().unwrap_or_default(),
                    "pending_write_failed"
                );
            }
            let _ = write.reply.send(outcome);
        }
    }

    async fn read_classified(
        &self,
        driver: &dyn Driver,
        point: &Point,
    ) -> Result<PointResult, ProtocolError> {
        let _gate = self.gate.lock().await;
        self.drain().await;
        PointExecutor::read(driver, point).await
    }

    /// 读取单个点位；任何错误都合成为同类型的失败结果
    pub async fn read_point(&self, driver: &dyn Driver, point: &Point) -> PointResult {
        match self.read_classified(driver, point).await {
            Ok(result) => result,
            Err(err) => PointResult::failed(point, err.to_string(), 0),
        }
    }
}

#[async_trait]
impl AccessPath for PointCoordinator {
    async fn read_device(
        &self,
        driver: Arc<dyn Driver>,
        device: &Device,
        pacing: Duration,
        cancel: &CancellationToken,
    ) -> DeviceRead {
        let mut read = DeviceRead::default();
        for point in &device.points {
            if cancel.is_cancelled() {
                read.cancelled = true;
                return read;
            }
            match self.read_classified(driver.as_ref(), point).await {
                Ok(result) => read.results.push(result),
                Err(err) => {
                    read.failure = Some(err);
                    return read;
                }
            }
            if !pace(pacing, cancel).await {
                read.cancelled = true;
                return read;
            }
        }
        read
    }

    async fn write_point(
        &self,
        driver: Arc<dyn Driver>,
        point: &Point,
        value: &Value,
    ) -> WriteOutcome {
        let (reply, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(PendingWrite {
                driver,
                point: point.clone(),
                value: value.clone(),
                reply,
            });
        {
            let _gate = self.gate.lock().await;
            self.drain().await;
        }
        rx.await
            .unwrap_or_else(|_| WriteOutcome::failed("pending write dropped", 0))
    }
}

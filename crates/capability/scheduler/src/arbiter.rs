//! 串口总线仲裁器
//!
//! 一条物理串口只能串行收发，同一串口上的全部读写都交给一个仲裁任务执行：
//!
//! ```text
//! read_tx ──▶ [读批次队列] ──┐
//!                            ├──▶ 仲裁任务（biased select，写队列优先）──▶ Driver
//! write_tx ─▶ [写批次队列] ──┘
//! ```
//!
//! - 写队列就绪：整队清空（包括清空过程中新到达的写批次）后才看读队列
//! - 读批次逐点执行，每个点位读取前先清空写队列
//! - 请求方已离开（接收端关闭）的读批次，剩余点位直接跳过
//! - 链路级错误终止当前读批次

use crate::access::{AccessPath, DeviceRead};
use async_trait::async_trait;
use domain::{Device, Point, PointResult};
use gw_protocol::{Driver, PointExecutor, ProtocolError, WriteOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 读批次：同一驱动下按顺序读取的点位
pub struct ReadBatch {
    pub driver: Arc<dyn Driver>,
    pub points: Vec<Point>,
    /// 每个点位之后的间隔
    pub pacing: Duration,
    /// 逐点回传结果；链路级错误回传后批次终止
    pub reply: mpsc::UnboundedSender<Result<PointResult, ProtocolError>>,
}

/// 写批次
pub struct WriteBatch {
    pub driver: Arc<dyn Driver>,
    pub items: Vec<(Point, Value)>,
    pub reply: oneshot::Sender<Vec<WriteOutcome>>,
}

/// 仲裁器句柄
#[derive(Clone)]
pub struct BusHandle {
    read_tx: mpsc::UnboundedSender<ReadBatch>,
    write_tx: mpsc::UnboundedSender<WriteBatch>,
}

impl BusHandle {
    /// 提交读批次，返回逐点结果接收端；仲裁器已退出时接收端立即关闭
    pub fn submit_reads(
        &self,
        driver: Arc<dyn Driver>,
        points: Vec<Point>,
        pacing: Duration,
    ) -> mpsc::UnboundedReceiver<Result<PointResult, ProtocolError>> {
        let (reply, rx) = mpsc::unbounded_channel();
        let _ = self.read_tx.send(ReadBatch {
            driver,
            points,
            pacing,
            reply,
        });
        rx
    }

    /// 提交写批次；仲裁器已退出时接收端返回错误
    pub fn submit_writes(
        &self,
        driver: Arc<dyn Driver>,
        items: Vec<(Point, Value)>,
    ) -> oneshot::Receiver<Vec<WriteOutcome>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.write_tx.send(WriteBatch {
            driver,
            items,
            reply,
        });
        rx
    }
}

#[async_trait]
impl AccessPath for BusHandle {
    async fn read_device(
        &self,
        driver: Arc<dyn Driver>,
        device: &Device,
        pacing: Duration,
        cancel: &CancellationToken,
    ) -> DeviceRead {
        let mut read = DeviceRead::default();
        if device.points.is_empty() {
            return read;
        }
        let mut rx = self.submit_reads(driver, device.points.clone(), pacing);
        while read.results.len() < device.points.len() {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    read.cancelled = true;
                    return read;
                }
                next = rx.recv() => next,
            };
            match next {
                Some(Ok(result)) => read.results.push(result),
                Some(Err(err)) => {
                    read.failure = Some(err);
                    return read;
                }
                None if cancel.is_cancelled() => {
                    read.cancelled = true;
                    return read;
                }
                None => {
                    read.failure = Some(ProtocolError::Closed);
                    return read;
                }
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
        let rx = self.submit_writes(driver, vec![(point.clone(), value.clone())]);
        match rx.await {
            Ok(mut outcomes) if !outcomes.is_empty() => outcomes.remove(0),
            _ => WriteOutcome::failed("serial bus arbiter stopped", 0),
        }
    }
}

/// 串口总线仲裁任务
pub struct SerialBusArbiter {
    read_rx: mpsc::UnboundedReceiver<ReadBatch>,
    write_rx: mpsc::UnboundedReceiver<WriteBatch>,
    cancel: CancellationToken,
}

impl SerialBusArbiter {
    /// 启动仲裁任务，`cancel` 取消后任务退出
    pub fn spawn(cancel: CancellationToken) -> (BusHandle, JoinHandle<()>) {
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let arbiter = Self {
            read_rx,
            write_rx,
            cancel,
        };
        let join = tokio::spawn(arbiter.run());
        (BusHandle { read_tx, write_tx }, join)
    }

    async fn run(mut self) {
        debug!(target: "gateway.arbiter", "serial_bus_arbiter_started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(batch) = self.write_rx.recv() => {
                    Self::execute_writes(batch).await;
                    self.drain_writes().await;
                }
                Some(batch) = self.read_rx.recv() => self.execute_reads(batch).await,
                else => break,
            }
        }
        info!(target: "gateway.arbiter", "serial_bus_arbiter_stopped");
    }

    /// 清空写队列，包括清空过程中新到达的批次
    async fn drain_writes(&mut self) {
        while let Ok(batch) = self.write_rx.try_recv() {
            Self::execute_writes(batch).await;
        }
    }

    async fn execute_writes(batch: WriteBatch) {
        let mut outcomes = Vec::with_capacity(batch.items.len());
        for (point, value) in &batch.items {
            let outcome = PointExecutor::write(batch.driver.as_ref(), point, value).await;
            if !outcome.ok {
                warn!(
                    target: "gateway.arbiter",
                    label = %point.label,
                    error = outcome.message.as_deref().unwrap_or_default(),
                    "bus_write_failed"
                );
            }
            outcomes.push(outcome);
        }
        let _ = batch.reply.send(outcomes);
    }

    async fn execute_reads(&mut self, batch: ReadBatch) {
        for point in &batch.points {
            self.drain_writes().await;
            if self.cancel.is_cancelled() {
                return;
            }
            if batch.reply.is_closed() {
                debug!(target: "gateway.arbiter", label = %point.label, "read_batch_abandoned");
                return;
            }
            let outcome = PointExecutor::read(batch.driver.as_ref(), point).await;
            let link_lost = outcome.is_err();
            if batch.reply.send(outcome).is_err() || link_lost {
                return;
            }
            if !crate::access::pace(batch.pacing, &self.cancel).await {
                return;
            }
        }
    }
}

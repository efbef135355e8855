//! 设备访问路径
//!
//! 监督器和写入调度都通过 [`AccessPath`] 访问设备：独占连接直接读写，
//! 共享串口经由总线仲裁器或点位协调器，保证写优先。

use crate::arbiter::SerialBusArbiter;
use crate::coordinator::PointCoordinator;
use crate::error::SchedulerError;
use async_trait::async_trait;
use domain::{Device, Point, PointResult, ProtocolConfig, SerialSettings};
use gw_protocol::{Driver, PointExecutor, ProtocolError, WriteOutcome};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 一个设备本周期的读取结果
#[derive(Debug, Default)]
pub struct DeviceRead {
    /// 已完成的点位结果（按配置顺序）
    pub results: Vec<PointResult>,
    /// 链路级错误：设备其余点位不再读取
    pub failure: Option<ProtocolError>,
    /// 读取途中收到取消信号
    pub cancelled: bool,
}

#[async_trait]
pub trait AccessPath: Send + Sync {
    /// 按配置顺序读取设备全部点位，每个点位之后等待 `pacing`
    async fn read_device(
        &self,
        driver: Arc<dyn Driver>,
        device: &Device,
        pacing: Duration,
        cancel: &CancellationToken,
    ) -> DeviceRead;

    /// 写入单个点位
    async fn write_point(&self, driver: Arc<dyn Driver>, point: &Point, value: &Value)
    -> WriteOutcome;
}

/// 点位间隔等待；返回 `false` 表示等待期间被取消
pub(crate) async fn pace(pacing: Duration, cancel: &CancellationToken) -> bool {
    if pacing.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(pacing) => true,
    }
}

/// 独占连接：直接顺序读写
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectAccess;

#[async_trait]
impl AccessPath for DirectAccess {
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
            match PointExecutor::read(driver.as_ref(), point).await {
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
        PointExecutor::write(driver.as_ref(), point, value).await
    }
}

/// 共享串口的仲裁方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerialArbitration {
    /// 每个串口一个仲裁任务，读批次与写批次两条队列
    #[default]
    Bus,
    /// 每个串口一把门锁，逐点读取前清空待写队列
    Point,
}

impl FromStr for SerialArbitration {
    type Err = SchedulerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bus" => Ok(SerialArbitration::Bus),
            "point" => Ok(SerialArbitration::Point),
            other => Err(SchedulerError::InvalidArbitration(other.to_string())),
        }
    }
}

/// 访问路径路由
///
/// 串口协议按串口参数共享同一个仲裁器 / 协调器，其余协议直接访问。
pub struct AccessRouter {
    arbitration: SerialArbitration,
    direct: Arc<DirectAccess>,
    shared: Mutex<HashMap<SerialSettings, Arc<dyn AccessPath>>>,
    cancel: CancellationToken,
}

impl AccessRouter {
    /// `cancel` 取消时所有总线仲裁任务退出
    pub fn new(arbitration: SerialArbitration, cancel: CancellationToken) -> Self {
        Self {
            arbitration,
            direct: Arc::new(DirectAccess),
            shared: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn arbitration(&self) -> SerialArbitration {
        self.arbitration
    }

    /// 协议配置对应的访问路径；同一串口参数总是返回同一实例
    pub fn path_for(&self, config: &ProtocolConfig) -> Arc<dyn AccessPath> {
        let Some(settings) = config.serial_settings() else {
            return self.direct.clone();
        };
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared
            .entry(settings.clone())
            .or_insert_with(|| {
                info!(
                    target: "gateway.scheduler",
                    port = %settings.port_name,
                    baud_rate = settings.baud_rate,
                    mode = ?self.arbitration,
                    "serial_arbitration_created"
                );
                match self.arbitration {
                    SerialArbitration::Bus => {
                        let (handle, _join) = SerialBusArbiter::spawn(self.cancel.child_token());
                        Arc::new(handle) as Arc<dyn AccessPath>
                    }
                    SerialArbitration::Point => {
                        Arc::new(PointCoordinator::new()) as Arc<dyn AccessPath>
                    }
                }
            })
            .clone()
    }

    /// 已创建的共享路径数量（每个串口参数一个）
    pub fn shared_paths(&self) -> usize {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

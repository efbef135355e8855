//! 协议采集监督器
//!
//! 每个协议配置一个可取消的采集循环，互相隔离。
//!
//! ```text
//! Created ──▶ Running ──▶ Stopping ──▶ Stopped
//!                │  ▲
//!                ▼  │ restart
//!              Paused（写入抢占）
//! ```
//!
//! 生命周期操作（start / stop / pause / restart）由一把异步锁串行化，
//! 同一协议 ID 总是先等旧循环退出再启动新循环。

use crate::access::{AccessPath, AccessRouter};
use crate::error::SchedulerError;
use crate::publisher::ResultPublisher;
use domain::{DeviceResult, ProtocolConfig, ProtocolResult};
use gw_protocol::{Driver, DriverRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TARGET: &str = "gateway.supervisor";

/// 协议循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Created,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// 监督器设置
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// 采集结果发布主题前缀，实际主题为 `{prefix}/{protocol_id}`
    pub result_topic_prefix: String,
    /// 按协议类型（小写）配置的点位间隔
    pub point_delays: HashMap<String, Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            result_topic_prefix: "gateway/data".to_string(),
            point_delays: HashMap::new(),
        }
    }
}

impl SupervisorSettings {
    pub fn pacing_for(&self, protocol_type: &str) -> Duration {
        self.point_delays
            .get(&protocol_type.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    config: Arc<ProtocolConfig>,
}

struct Inner {
    registry: DriverRegistry,
    publisher: Arc<dyn ResultPublisher>,
    access: Arc<AccessRouter>,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    lifecycle: Mutex<()>,
    loops: StdMutex<HashMap<String, LoopHandle>>,
    paused: StdMutex<HashMap<String, Arc<ProtocolConfig>>>,
    drivers: StdMutex<HashMap<String, Arc<dyn Driver>>>,
    states: StdMutex<HashMap<String, ProtocolState>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn set_state(&self, id: &str, state: ProtocolState) {
        lock(&self.states).insert(id.to_string(), state);
    }

    /// 取得协议的驱动实例，不存在时创建（插入即占位）
    fn driver_for(&self, config: &ProtocolConfig) -> Option<Arc<dyn Driver>> {
        let mut drivers = lock(&self.drivers);
        if let Some(driver) = drivers.get(&config.id) {
            return Some(driver.clone());
        }
        let driver = self.registry.create(config)?;
        drivers.insert(config.id.clone(), driver.clone());
        gw_telemetry::record_driver_created();
        debug!(target: TARGET, protocol_id = %config.id, "driver_created");
        Some(driver)
    }

    /// 销毁并遗忘协议的驱动；并发调用时只有一方真正关闭
    async fn dispose(&self, id: &str) {
        let driver = lock(&self.drivers).remove(id);
        if let Some(driver) = driver {
            driver.close().await;
            gw_telemetry::record_driver_disposed();
            info!(target: TARGET, protocol_id = %id, "driver_disposed");
        }
    }
}

/// 协议采集监督器
#[derive(Clone)]
pub struct ProtocolSupervisor {
    inner: Arc<Inner>,
}

impl ProtocolSupervisor {
    pub fn new(
        registry: DriverRegistry,
        publisher: Arc<dyn ResultPublisher>,
        access: Arc<AccessRouter>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                publisher,
                access,
                settings,
                cancel: CancellationToken::new(),
                lifecycle: Mutex::new(()),
                loops: StdMutex::new(HashMap::new()),
                paused: StdMutex::new(HashMap::new()),
                drivers: StdMutex::new(HashMap::new()),
                states: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.inner.registry
    }

    pub fn access(&self) -> &Arc<AccessRouter> {
        &self.inner.access
    }

    /// 启动全部协议，返回成功启动的数量
    pub async fn start_all(&self, configs: &[ProtocolConfig]) -> usize {
        let mut started = 0;
        for config in configs {
            match self.start(config.clone()).await {
                Ok(()) => started += 1,
                Err(err) => warn!(target: TARGET, protocol_id = %config.id, error = %err, "protocol_start_skipped"),
            }
        }
        info!(target: TARGET, started, total = configs.len(), "protocols_started");
        started
    }

    /// 启动单个协议；已在运行或协议类型未实现时不创建循环
    pub async fn start(&self, config: ProtocolConfig) -> Result<(), SchedulerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.start_locked(Arc::new(config))
    }

    fn start_locked(&self, config: Arc<ProtocolConfig>) -> Result<(), SchedulerError> {
        if !self.inner.registry.supports(&config.protocol_type) {
            return Err(SchedulerError::UnsupportedProtocol {
                id: config.id.clone(),
                protocol_type: config.protocol_type.clone(),
            });
        }
        let mut loops = lock(&self.inner.loops);
        if loops.contains_key(&config.id) {
            return Err(SchedulerError::AlreadyRunning(config.id.clone()));
        }
        lock(&self.inner.paused).remove(&config.id);

        let cancel = self.inner.cancel.child_token();
        self.inner.set_state(&config.id, ProtocolState::Created);
        let join = tokio::spawn(run_loop(self.inner.clone(), config.clone(), cancel.clone()));
        info!(
            target: TARGET,
            protocol_id = %config.id,
            protocol_type = %config.protocol_type,
            devices = config.devices.len(),
            points = config.total_points(),
            cycle_ms = config.collect_cycle().as_millis() as u64,
            "protocol_loop_started"
        );
        loops.insert(
            config.id.clone(),
            LoopHandle {
                cancel,
                join,
                config,
            },
        );
        Ok(())
    }

    /// 取消循环并等待其退出，返回循环绑定的配置
    async fn quiesce(&self, id: &str) -> Option<Arc<ProtocolConfig>> {
        let handle = lock(&self.inner.loops).remove(id)?;
        self.inner.set_state(id, ProtocolState::Stopping);
        handle.cancel.cancel();
        if let Err(err) = handle.join.await {
            if err.is_panic() {
                error!(target: TARGET, protocol_id = %id, "protocol_loop_panicked");
            }
        }
        Some(handle.config)
    }

    /// 停止协议并销毁驱动；重复调用无副作用
    pub async fn stop(&self, id: &str) -> bool {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked(id).await
    }

    async fn stop_locked(&self, id: &str) -> bool {
        let was_paused = lock(&self.inner.paused).remove(id).is_some();
        let was_running = self.quiesce(id).await.is_some();
        if !was_running && !was_paused {
            return false;
        }
        self.inner.dispose(id).await;
        self.inner.set_state(id, ProtocolState::Stopped);
        info!(target: TARGET, protocol_id = %id, "protocol_loop_stopped");
        true
    }

    /// 写入抢占：停下循环但保留驱动，返回循环绑定的配置
    pub async fn pause(&self, id: &str) -> Option<Arc<ProtocolConfig>> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(config) = lock(&self.inner.paused).get(id) {
            return Some(config.clone());
        }
        let config = self.quiesce(id).await?;
        lock(&self.inner.paused).insert(id.to_string(), config.clone());
        self.inner.set_state(id, ProtocolState::Paused);
        info!(target: TARGET, protocol_id = %id, "protocol_paused");
        Some(config)
    }

    /// 以新配置重启；新配置与循环绑定的配置相同时沿用现有驱动
    pub async fn restart(&self, config: ProtocolConfig) -> Result<(), SchedulerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let id = config.id.clone();
        let paused = lock(&self.inner.paused).remove(&id);
        let bound = match self.quiesce(&id).await {
            Some(bound) => Some(bound),
            None => paused,
        };
        let keep_driver = bound.as_deref() == Some(&config);
        if !keep_driver {
            self.inner.dispose(&id).await;
        }
        let result = self.start_locked(Arc::new(config));
        if result.is_err() {
            self.inner.dispose(&id).await;
            self.inner.set_state(&id, ProtocolState::Stopped);
        }
        debug!(target: TARGET, protocol_id = %id, keep_driver, "protocol_restarted");
        result
    }

    /// 停止全部协议（含已暂停的），返回停止的数量
    pub async fn stop_all(&self) -> usize {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let mut ids: Vec<String> = lock(&self.inner.loops).keys().cloned().collect();
        ids.extend(lock(&self.inner.paused).keys().cloned());
        ids.sort();
        ids.dedup();
        let mut stopped = 0;
        for id in &ids {
            if self.stop_locked(id).await {
                stopped += 1;
            }
        }
        let leftover: Vec<String> = lock(&self.inner.drivers).keys().cloned().collect();
        for id in leftover {
            self.inner.dispose(&id).await;
        }
        info!(target: TARGET, stopped, "protocols_stopped");
        stopped
    }

    /// 协议当前持有的驱动
    pub fn live_driver(&self, id: &str) -> Option<Arc<dyn Driver>> {
        lock(&self.inner.drivers).get(id).cloned()
    }

    pub fn state(&self, id: &str) -> Option<ProtocolState> {
        lock(&self.inner.states).get(id).copied()
    }

    /// 正在运行的协议 ID（排序后）
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.loops).keys().cloned().collect();
        ids.sort();
        ids
    }
}

async fn run_loop(inner: Arc<Inner>, config: Arc<ProtocolConfig>, cancel: CancellationToken) {
    {
        let mut states = lock(&inner.states);
        if states.get(&config.id) == Some(&ProtocolState::Created) {
            states.insert(config.id.clone(), ProtocolState::Running);
        }
    }
    let access = inner.access.path_for(&config);
    let pacing = inner.settings.pacing_for(&config.protocol_type);
    let topic = format!("{}/{}", inner.settings.result_topic_prefix, config.id);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(result) = run_cycle(&inner, &config, access.as_ref(), pacing, &cancel).await
        else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: TARGET, protocol_id = %config.id, "result_publish_abandoned");
                break;
            }
            _ = publish(&inner, &topic, &result) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.collect_cycle()) => {}
        }
    }
    debug!(target: TARGET, protocol_id = %config.id, "protocol_loop_exited");
}

/// 执行一个采集周期；周期中途被取消时返回 `None`，不发布部分结果
async fn run_cycle(
    inner: &Inner,
    config: &ProtocolConfig,
    access: &dyn AccessPath,
    pacing: Duration,
    cancel: &CancellationToken,
) -> Option<ProtocolResult> {
    let started = Instant::now();
    let mut result = ProtocolResult::begin(config);

    for device in &config.devices {
        if cancel.is_cancelled() {
            return None;
        }
        let mut device_result = DeviceResult::begin(&device.equipment_id);

        match inner.driver_for(config) {
            None => device_result.fail_all(device, "no driver registered"),
            Some(driver) => match driver.connect().await {
                Err(err) => {
                    warn!(
                        target: TARGET,
                        protocol_id = %config.id,
                        equipment_id = %device.equipment_id,
                        error = %err,
                        "device_connect_failed"
                    );
                    device_result.fail_all(device, err.to_string());
                    inner.dispose(&config.id).await;
                    gw_telemetry::record_device_connection_failure();
                }
                Ok(()) => {
                    let read = access.read_device(driver, device, pacing, cancel).await;
                    if read.cancelled {
                        return None;
                    }
                    match read.failure {
                        Some(err) => {
                            warn!(
                                target: TARGET,
                                protocol_id = %config.id,
                                equipment_id = %device.equipment_id,
                                error = %err,
                                "device_link_lost"
                            );
                            device_result.fail_all(device, err.to_string());
                            inner.dispose(&config.id).await;
                            gw_telemetry::record_device_connection_failure();
                        }
                        None => {
                            for point_result in read.results {
                                device_result.push(point_result);
                            }
                        }
                    }
                }
            },
        }

        device_result.finish();
        result.push(device_result);
    }

    result.finish();
    let total_failure = result.all_points_failed();
    if total_failure {
        warn!(
            target: TARGET,
            protocol_id = %config.id,
            points = result.total_points,
            "protocol_total_failure"
        );
        inner.dispose(&config.id).await;
    }
    gw_telemetry::record_points(result.success_points as u64, result.failed_points as u64);
    gw_telemetry::record_cycle(total_failure, started.elapsed().as_millis() as u64);
    debug!(
        target: TARGET,
        protocol_id = %config.id,
        success = result.success,
        success_points = result.success_points,
        failed_points = result.failed_points,
        elapsed_ms = result.elapsed_ms,
        "protocol_cycle_completed"
    );
    Some(result)
}

async fn publish(inner: &Inner, topic: &str, result: &ProtocolResult) {
    let payload = match serde_json::to_vec(result) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(target: TARGET, protocol_id = %result.protocol_id, error = %err, "result_encode_failed");
            return;
        }
    };
    if !inner.publisher.publish(topic, payload).await {
        gw_telemetry::record_publish_failure();
        warn!(target: TARGET, topic = %topic, "result_publish_failed");
    }
}

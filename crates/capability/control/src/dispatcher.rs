//! 写入调度
//!
//! 所有写入任务进入同一条队列，由一个消费任务逐个执行，全网关同一时刻
//! 最多只有一个写入任务在进行。每个任务：
//!
//! 1. 暂停目标协议的采集循环（驱动保留），其它协议不受影响
//! 2. 按标签（其次地址）解析写入点位，经协议的访问路径写入：
//!    有存活驱动则借用，否则临时创建，用完即关闭
//! 3. 发布执行回显 `{echo_prefix}/{protocol_id}`
//! 4. 按最新配置重启协议；配置已删除则保持停止

use crate::ControlError;
use domain::{DataType, Point, PointResult, ProtocolConfig, WriteReport, WriteTarget, WriteTask};
use gw_config::ConfigSource;
use gw_protocol::Driver;
use gw_scheduler::{ProtocolSupervisor, ResultPublisher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TARGET: &str = "gateway.dispatcher";

/// 写入队列入口
#[derive(Clone)]
pub struct WriteDispatcher {
    tx: mpsc::UnboundedSender<WriteTask>,
}

impl WriteDispatcher {
    /// 启动消费任务，`cancel` 取消后不再取新任务
    pub fn spawn(
        supervisor: ProtocolSupervisor,
        source: Arc<dyn ConfigSource>,
        publisher: Arc<dyn ResultPublisher>,
        echo_topic_prefix: String,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = WriteWorker {
            supervisor,
            source,
            publisher,
            echo_topic_prefix,
            cancel,
        };
        let join = tokio::spawn(worker.run(rx));
        (Self { tx }, join)
    }

    /// 提交写入任务；消费任务已退出时返回错误
    pub fn enqueue(&self, task: WriteTask) -> Result<(), ControlError> {
        debug!(
            target: TARGET,
            task_id = %task.task_id,
            protocol_id = %task.protocol_id,
            targets = task.targets.len(),
            "write_task_enqueued"
        );
        self.tx.send(task).map_err(|_| ControlError::Closed)
    }
}

struct WriteWorker {
    supervisor: ProtocolSupervisor,
    source: Arc<dyn ConfigSource>,
    publisher: Arc<dyn ResultPublisher>,
    echo_topic_prefix: String,
    cancel: CancellationToken,
}

impl WriteWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WriteTask>) {
        info!(target: TARGET, "write_dispatcher_started");
        loop {
            let task = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.handle(task).await;
        }
        info!(target: TARGET, "write_dispatcher_stopped");
    }

    async fn handle(&self, task: WriteTask) {
        let started = Instant::now();
        let id = task.protocol_id.clone();
        let bound = self.supervisor.pause(&id).await;
        let config = match bound {
            Some(config) => config,
            None => match self.latest_config(&id).await {
                Some(config) => Arc::new(config),
                None => {
                    warn!(target: TARGET, task_id = %task.task_id, protocol_id = %id, "write_task_unknown_protocol");
                    return;
                }
            },
        };

        match self.execute(&task, &config).await {
            Some(results) => {
                let report = WriteReport::new(&task, results, started.elapsed().as_millis() as u64);
                self.report(&report).await;
            }
            None => {
                warn!(
                    target: TARGET,
                    task_id = %task.task_id,
                    protocol_id = %id,
                    protocol_type = %config.protocol_type,
                    "write_task_unsupported_protocol"
                );
                // 未实现的协议类型不会有采集循环，只清理可能残留的暂停状态
                self.supervisor.stop(&id).await;
                return;
            }
        }

        self.resume(&id, &config).await;
    }

    /// 执行全部写入目标；协议类型未实现时返回 `None`
    async fn execute(&self, task: &WriteTask, config: &ProtocolConfig) -> Option<Vec<PointResult>> {
        let (driver, transient) = match self.supervisor.live_driver(&config.id) {
            Some(driver) => (driver, false),
            None => (self.supervisor.registry().create(config)?, true),
        };
        debug!(
            target: TARGET,
            task_id = %task.task_id,
            protocol_id = %config.id,
            transient,
            "write_task_driver_acquired"
        );

        let results = match driver.connect().await {
            Ok(()) => self.write_targets(task, config, driver.clone()).await,
            Err(err) => task
                .targets
                .iter()
                .map(|target| PointResult::failed(&fallback_point(target), err.to_string(), 0))
                .collect(),
        };

        if transient {
            driver.close().await;
        }
        Some(results)
    }

    async fn write_targets(
        &self,
        task: &WriteTask,
        config: &ProtocolConfig,
        driver: Arc<dyn Driver>,
    ) -> Vec<PointResult> {
        let path = self.supervisor.access().path_for(config);
        let mut results = Vec::with_capacity(task.targets.len());
        for target in &task.targets {
            let point = match resolve_target(config, target) {
                Ok(point) => point,
                Err(message) => {
                    results.push(PointResult::failed(&fallback_point(target), message, 0));
                    continue;
                }
            };
            let outcome = path.write_point(driver.clone(), &point, &target.value).await;
            results.push(outcome.into_point_result(&point));
        }
        results
    }

    async fn report(&self, report: &WriteReport) {
        let ok = report.point_results.iter().filter(|r| r.success).count() as u64;
        let failed = report.point_results.len() as u64 - ok;
        gw_telemetry::record_write_task(ok, failed);
        info!(
            target: TARGET,
            task_id = %report.task_id,
            protocol_id = %report.protocol_id,
            success = report.success,
            ok,
            failed,
            elapsed_ms = report.elapsed_ms,
            "write_task_completed"
        );

        let payload = match serde_json::to_vec(report) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: TARGET, task_id = %report.task_id, error = %err, "write_report_encode_failed");
                return;
            }
        };
        let topic = format!(
            "{}/{}",
            self.echo_topic_prefix.trim_end_matches('/'),
            report.protocol_id
        );
        let published = tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!(target: TARGET, task_id = %report.task_id, topic = %topic, "write_report_publish_abandoned");
                return;
            }
            published = self.publisher.publish(&topic, payload) => published,
        };
        if !published {
            gw_telemetry::record_publish_failure();
            warn!(target: TARGET, task_id = %report.task_id, topic = %topic, "write_report_publish_failed");
        }
    }

    /// 按最新配置恢复协议；读取配置失败时以暂停前的配置恢复
    async fn resume(&self, id: &str, bound: &ProtocolConfig) {
        let latest = match self.source.latest().await {
            Ok(snapshot) => snapshot.and_then(|snapshot| snapshot.find(id).cloned()),
            Err(err) => {
                warn!(target: TARGET, protocol_id = %id, error = %err, "config_lookup_failed");
                Some(bound.clone())
            }
        };
        match latest {
            Some(config) => {
                if let Err(err) = self.supervisor.restart(config).await {
                    warn!(target: TARGET, protocol_id = %id, error = %err, "protocol_resume_failed");
                }
            }
            None => {
                warn!(target: TARGET, protocol_id = %id, "protocol_removed_left_stopped");
                self.supervisor.stop(id).await;
            }
        }
    }

    async fn latest_config(&self, id: &str) -> Option<ProtocolConfig> {
        match self.source.latest().await {
            Ok(snapshot) => snapshot?.find(id).cloned(),
            Err(err) => {
                warn!(target: TARGET, protocol_id = %id, error = %err, "config_lookup_failed");
                None
            }
        }
    }
}

/// 在配置中查找写入点位；找不到时用目标自带的地址与类型
fn resolve_target(config: &ProtocolConfig, target: &WriteTarget) -> Result<Point, String> {
    if let Some(point) = config.find_point(&target.label, target.address.as_deref()) {
        return Ok(point.clone());
    }
    match (&target.address, &target.data_type) {
        (Some(address), Some(data_type)) => {
            let label = if target.label.is_empty() {
                address.clone()
            } else {
                target.label.clone()
            };
            Ok(Point::new(label, address.clone(), data_type.clone()))
        }
        _ => Err(format!(
            "point '{}' not found in protocol {}",
            target.label, config.id
        )),
    }
}

fn fallback_point(target: &WriteTarget) -> Point {
    Point::new(
        target.label.clone(),
        target.address.clone().unwrap_or_default(),
        target
            .data_type
            .clone()
            .unwrap_or_else(|| DataType::Other("unknown".to_string())),
    )
}

//! 追踪初始化、任务 ID 生成与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycle_latency_ms_total: u64,
    pub cycle_latency_ms_count: u64,
    pub points_ok: u64,
    pub points_failed: u64,
    pub device_connection_failures: u64,
    pub drivers_created: u64,
    pub drivers_disposed: u64,
    pub write_tasks: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub publish_failures: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    cycle_latency_ms_total: AtomicU64,
    cycle_latency_ms_count: AtomicU64,
    points_ok: AtomicU64,
    points_failed: AtomicU64,
    device_connection_failures: AtomicU64,
    drivers_created: AtomicU64,
    drivers_disposed: AtomicU64,
    write_tasks: AtomicU64,
    writes_ok: AtomicU64,
    writes_failed: AtomicU64,
    publish_failures: AtomicU64,
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            cycle_latency_ms_total: AtomicU64::new(0),
            cycle_latency_ms_count: AtomicU64::new(0),
            points_ok: AtomicU64::new(0),
            points_failed: AtomicU64::new(0),
            device_connection_failures: AtomicU64::new(0),
            drivers_created: AtomicU64::new(0),
            drivers_disposed: AtomicU64::new(0),
            write_tasks: AtomicU64::new(0),
            writes_ok: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycle_latency_ms_total: self.cycle_latency_ms_total.load(Ordering::Relaxed),
            cycle_latency_ms_count: self.cycle_latency_ms_count.load(Ordering::Relaxed),
            points_ok: self.points_ok.load(Ordering::Relaxed),
            points_failed: self.points_failed.load(Ordering::Relaxed),
            device_connection_failures: self.device_connection_failures.load(Ordering::Relaxed),
            drivers_created: self.drivers_created.load(Ordering::Relaxed),
            drivers_disposed: self.drivers_disposed.load(Ordering::Relaxed),
            write_tasks: self.write_tasks.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的写入任务 ID。
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录一个采集周期（`failed` 表示全部点位失败）。
pub fn record_cycle(failed: bool, latency_ms: u64) {
    let metrics = metrics();
    if failed {
        metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .cycle_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .cycle_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录点位读取结果。
pub fn record_points(ok: u64, failed: u64) {
    let metrics = metrics();
    metrics.points_ok.fetch_add(ok, Ordering::Relaxed);
    metrics.points_failed.fetch_add(failed, Ordering::Relaxed);
}

/// 记录设备级链路失败。
pub fn record_device_connection_failure() {
    metrics()
        .device_connection_failures
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_driver_created() {
    metrics().drivers_created.fetch_add(1, Ordering::Relaxed);
}

pub fn record_driver_disposed() {
    metrics().drivers_disposed.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入任务及其点位结果。
pub fn record_write_task(ok: u64, failed: u64) {
    let metrics = metrics();
    metrics.write_tasks.fetch_add(1, Ordering::Relaxed);
    metrics.writes_ok.fetch_add(ok, Ordering::Relaxed);
    metrics.writes_failed.fetch_add(failed, Ordering::Relaxed);
}

/// 记录发布失败次数。
pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

//! 协议配置监听
//!
//! 按固定间隔轮询配置源；版本变化时整体停止再全部启动。

use gw_config::{ConfigSnapshot, ConfigSource};
use gw_scheduler::ProtocolSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ConfigWatcher {
    source: Arc<dyn ConfigSource>,
    supervisor: ProtocolSupervisor,
    interval: Duration,
    applied: Option<i64>,
}

impl ConfigWatcher {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        supervisor: ProtocolSupervisor,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            supervisor,
            interval,
            applied: None,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            self.poll().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(target: "gateway.watcher", "config_watcher_stopped");
    }

    /// 检查一次配置；有新版本时返回 `true`
    async fn poll(&mut self) -> bool {
        if let Some(saved_at) = self.applied {
            match self.source.has_changed(saved_at).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    warn!(target: "gateway.watcher", error = %err, "config_check_failed");
                    return false;
                }
            }
        }
        let snapshot = match self.source.latest().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(err) => {
                warn!(target: "gateway.watcher", error = %err, "config_load_failed");
                return false;
            }
        };
        self.apply(snapshot).await;
        true
    }

    async fn apply(&mut self, snapshot: ConfigSnapshot) {
        if self.applied.is_some() {
            self.supervisor.stop_all().await;
        }
        let started = self.supervisor.start_all(&snapshot.protocols).await;
        info!(
            target: "gateway.watcher",
            saved_at = snapshot.saved_at,
            protocols = snapshot.protocols.len(),
            started,
            "config_applied"
        );
        self.applied = Some(snapshot.saved_at);
    }
}

//! 网关进程：装配驱动注册表、采集监督器、写入调度与配置监听。

mod watcher;

use gw_config::{AppConfig, ConfigSource, FileConfigSource};
use gw_control::{MqttConfig, MqttPublisher, WriteDispatcher, spawn_command_listener};
use gw_protocol::{DriverRegistry, SerialLines};
use gw_scheduler::{
    AccessRouter, NoopPublisher, ProtocolSupervisor, ResultPublisher, SerialArbitration,
    SupervisorSettings,
};
use gw_telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use watcher::ConfigWatcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let cancel = CancellationToken::new();

    // 驱动注册表：RTU 驱动共享同一个串口池
    let serial_lines = Arc::new(SerialLines::new());
    let registry = DriverRegistry::builtin(serial_lines);

    // 结果发布：未启用 MQTT 时丢弃
    let publisher: Arc<dyn ResultPublisher> = if config.mqtt_enabled {
        let (publisher, _handle) = MqttPublisher::connect(mqtt_config(&config));
        Arc::new(publisher)
    } else {
        Arc::new(NoopPublisher)
    };

    let arbitration: SerialArbitration = config.serial_arbitration.parse()?;
    let access = Arc::new(AccessRouter::new(arbitration, cancel.child_token()));
    let settings = SupervisorSettings {
        result_topic_prefix: config.mqtt_result_topic_prefix.clone(),
        point_delays: config
            .point_delays_ms
            .iter()
            .map(|(protocol_type, ms)| (protocol_type.clone(), Duration::from_millis(*ms)))
            .collect(),
    };
    let supervisor = ProtocolSupervisor::new(registry.clone(), publisher.clone(), access, settings);

    let source: Arc<dyn ConfigSource> = Arc::new(FileConfigSource::new(
        &config.config_path,
        config.config_defaults(),
    ));

    // 写入调度：全局唯一消费者
    let (dispatcher, dispatcher_join) = WriteDispatcher::spawn(
        supervisor.clone(),
        source.clone(),
        publisher,
        config.mqtt_write_echo_topic_prefix.clone(),
        cancel.child_token(),
    );
    if config.mqtt_enabled {
        spawn_command_listener(
            mqtt_config(&config),
            config.mqtt_command_topic_prefix.clone(),
            dispatcher,
        );
    }

    // 配置监听：首次全部启动，之后按版本变化整体重启
    let watcher = ConfigWatcher::new(
        source,
        supervisor.clone(),
        Duration::from_millis(config.config_poll_interval_ms),
    );
    let watcher_join = tokio::spawn(watcher.run(cancel.child_token()));

    info!(
        target: "gateway.app",
        config_path = %config.config_path,
        arbitration = ?arbitration,
        mqtt = config.mqtt_enabled,
        protocol_types = ?registry.protocol_types(),
        "gateway_started"
    );

    tokio::signal::ctrl_c().await?;
    info!(target: "gateway.app", "shutdown_requested");
    cancel.cancel();
    let _ = watcher_join.await;
    let _ = dispatcher_join.await;
    let stopped = supervisor.stop_all().await;
    let metrics = gw_telemetry::metrics().snapshot();
    info!(
        target: "gateway.app",
        stopped,
        cycles_completed = metrics.cycles_completed,
        cycles_failed = metrics.cycles_failed,
        write_tasks = metrics.write_tasks,
        "gateway_stopped"
    );
    Ok(())
}

fn mqtt_config(config: &AppConfig) -> MqttConfig {
    MqttConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        qos: config.mqtt_qos,
    }
}

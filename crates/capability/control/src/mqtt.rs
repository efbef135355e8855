//! MQTT 结果发布与写入命令接入
//!
//! 结果与写入回显经 `try_publish` 入队，请求队列满时直接判定发布失败，
//! 不阻塞采集循环。

use crate::ControlError;
use crate::dispatcher::WriteDispatcher;
use async_trait::async_trait;
use domain::{WriteTarget, WriteTask};
use gw_scheduler::ResultPublisher;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{info, warn};

/// MQTT 连接配置。
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
}

impl MqttConfig {
    fn options(&self, role: &str) -> MqttOptions {
        let client_id = format!("gateway-{}-{}", role, uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (self.username.clone(), self.password.clone()) {
            options.set_credentials(username, password);
        }
        options
    }
}

/// MQTT 结果发布者（采集结果与写入回显）。
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    pub fn connect(config: MqttConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let (client, mut eventloop) = AsyncClient::new(config.options("publish"), 10);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "gateway.mqtt", error = %err, "mqtt_publish_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        (
            Self {
                client,
                qos: qos_from_u8(config.qos),
            },
            handle,
        )
    }
}

#[async_trait]
impl ResultPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        match self.client.try_publish(topic, self.qos, false, payload) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "gateway.mqtt", topic = %topic, error = %err, "mqtt_publish_failed");
                false
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandPayload {
    #[serde(default, alias = "commandId", alias = "id")]
    task_id: Option<String>,
    #[serde(default)]
    protocol_id: Option<String>,
    #[serde(default, alias = "points", alias = "targetPoints")]
    targets: Vec<WriteTarget>,
}

/// 解析写入命令。
///
/// 主题为 `{prefix}/{protocol_id}`；负载中的 `protocolId` 优先于主题。
/// 负载缺少任务 ID 时生成一个。
pub fn parse_command(prefix: &str, topic: &str, payload: &[u8]) -> Result<WriteTask, ControlError> {
    let command: CommandPayload =
        serde_json::from_slice(payload).map_err(|err| ControlError::Payload(err.to_string()))?;
    let from_topic = topic
        .strip_prefix(prefix.trim_end_matches('/'))
        .map(|rest| rest.trim_matches('/'))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'));
    let protocol_id = command
        .protocol_id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| from_topic.map(str::to_string))
        .ok_or_else(|| ControlError::Payload(format!("no protocol id in topic {}", topic)))?;
    if command.targets.is_empty() {
        return Err(ControlError::Payload("no write targets".to_string()));
    }
    let task_id = command
        .task_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(gw_telemetry::new_task_id);
    Ok(WriteTask {
        task_id,
        protocol_id,
        targets: command.targets,
    })
}

/// 订阅 `{prefix}/#`，把收到的写入命令送入写入队列。
pub fn spawn_command_listener(
    config: MqttConfig,
    command_topic_prefix: String,
    dispatcher: WriteDispatcher,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (client, mut eventloop) = AsyncClient::new(config.options("command"), 10);
        let topic = format!("{}/#", command_topic_prefix.trim_end_matches('/'));
        if let Err(err) = client.subscribe(topic, qos_from_u8(config.qos)).await {
            warn!(target: "gateway.mqtt", error = %err, "mqtt_command_subscribe_failed");
            return;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let task = match parse_command(&command_topic_prefix, &publish.topic, &publish.payload) {
                        Ok(task) => task,
                        Err(err) => {
                            warn!(target: "gateway.mqtt", topic = %publish.topic, error = %err, "command_payload_invalid");
                            continue;
                        }
                    };
                    info!(
                        target: "gateway.mqtt",
                        task_id = %task.task_id,
                        protocol_id = %task.protocol_id,
                        targets = task.targets.len(),
                        "command_received"
                    );
                    if dispatcher.enqueue(task).is_err() {
                        warn!(target: "gateway.mqtt", "command_listener_dispatcher_closed");
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "gateway.mqtt", error = %err, "mqtt_command_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_protocol_from_topic() {
        let task = parse_command(
            "gateway/commands/",
            "gateway/commands/p1",
            br#"{"taskId":"t1","points":[{"label":"sp","value":12.5}]}"#,
        )
        .unwrap();
        assert_eq!(task.task_id, "t1");
        assert_eq!(task.protocol_id, "p1");
        assert_eq!(task.targets.len(), 1);
        assert_eq!(task.targets[0].label, "sp");
    }

    #[test]
    fn test_parse_command_payload_wins() {
        let task = parse_command(
            "gateway/commands",
            "gateway/commands/p1",
            br#"{"protocolId":"p2","targetPoints":[{"address":"40001","dataType":"uint16","value":3}]}"#,
        )
        .unwrap();
        assert_eq!(task.protocol_id, "p2");
        assert!(!task.task_id.is_empty());
        assert_eq!(task.targets[0].address.as_deref(), Some("40001"));
    }

    #[test]
    fn test_parse_command_rejects_incomplete() {
        assert!(parse_command("gateway/commands", "gateway/commands", br#"{"targets":[{"label":"a","value":1}]}"#).is_err());
        assert!(parse_command("gateway/commands", "gateway/commands/p1", br#"{"targets":[]}"#).is_err());
        assert!(parse_command("gateway/commands", "gateway/commands/p1", b"not json").is_err());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
    }
}

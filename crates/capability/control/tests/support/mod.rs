#![allow(dead_code)]

use async_trait::async_trait;
use domain::{
    AddressingOptions, DataType, Device, InterfaceKind, Point, PointValue, ProtocolConfig,
    SerialSettings,
};
use gw_protocol::{Driver, DriverRegistry, PointRequest, ProtocolError};
use gw_scheduler::{AccessRouter, ProtocolSupervisor, ResultPublisher, SerialArbitration, SupervisorSettings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 写入的开始 / 结束时刻
#[derive(Clone, Default)]
pub struct WriteWindows(Arc<Mutex<Vec<(String, Instant, Instant)>>>);

impl WriteWindows {
    pub fn all(&self) -> Vec<(String, Instant, Instant)> {
        self.0.lock().expect("windows").clone()
    }
}

#[derive(Clone, Default)]
pub struct Script {
    pub write_delay: Duration,
    pub writes: WriteWindows,
    pub write_started: Option<mpsc::UnboundedSender<String>>,
    pub created: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

pub struct ScriptedDriver {
    script: Script,
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn protocol_type(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read(&self, _request: &PointRequest) -> Result<PointValue, ProtocolError> {
        Ok(PointValue::I32(7))
    }

    async fn write(&self, request: &PointRequest, _value: &PointValue) -> Result<(), ProtocolError> {
        let started = Instant::now();
        if let Some(notify) = &self.script.write_started {
            let _ = notify.send(request.address.clone());
        }
        if !self.script.write_delay.is_zero() {
            tokio::time::sleep(self.script.write_delay).await;
        }
        self.script
            .writes
            .0
            .lock()
            .expect("windows")
            .push((request.address.clone(), started, Instant::now()));
        Ok(())
    }

    async fn close(&self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn registry(script: &Script) -> DriverRegistry {
    let script = script.clone();
    let mut registry = DriverRegistry::new();
    registry.register(
        &["scripted"],
        Arc::new(move |_config: &ProtocolConfig| {
            script.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(ScriptedDriver {
                script: script.clone(),
            }) as Arc<dyn Driver>
        }),
    );
    registry
}

pub struct Published {
    pub topic: String,
    pub payload: serde_json::Value,
    pub at: Instant,
}

pub struct RecordingPublisher {
    tx: mpsc::UnboundedSender<Published>,
}

impl RecordingPublisher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        let payload = serde_json::from_slice(&payload).expect("json payload");
        self.tx
            .send(Published {
                topic: topic.to_string(),
                payload,
                at: Instant::now(),
            })
            .is_ok()
    }
}

/// 读取发布记录直到出现指定主题，返回途中收到的全部记录（含该条）
pub async fn until_topic(rx: &mut mpsc::UnboundedReceiver<Published>, topic: &str) -> Vec<Published> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let next = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("publish within 5s")
            .expect("publisher open");
        let done = next.topic == topic;
        seen.push(next);
        if done {
            return seen;
        }
    }
}

pub fn protocol(id: &str, cycle_ms: u64) -> ProtocolConfig {
    ProtocolConfig {
        id: id.to_string(),
        interface_kind: Default::default(),
        protocol_type: "scripted".to_string(),
        collect_cycle_ms: cycle_ms,
        connect_timeout_ms: 1000,
        receive_timeout_ms: 1000,
        devices: vec![Device {
            equipment_id: format!("{}-meter", id),
            points: vec![
                Point::new("power", "40001", DataType::Int32),
                Point::new("setpoint", "40010", DataType::UInt16),
            ],
        }],
        addressing: Default::default(),
    }
}

pub fn supervisor(script: &Script, publisher: Arc<dyn ResultPublisher>) -> ProtocolSupervisor {
    serial_supervisor(script, publisher, SerialArbitration::Bus)
}

pub fn serial_supervisor(
    script: &Script,
    publisher: Arc<dyn ResultPublisher>,
    arbitration: SerialArbitration,
) -> ProtocolSupervisor {
    let access = Arc::new(AccessRouter::new(arbitration, CancellationToken::new()));
    ProtocolSupervisor::new(registry(script), publisher, access, SupervisorSettings::default())
}

pub fn serial_protocol(id: &str, port: &str, cycle_ms: u64) -> ProtocolConfig {
    ProtocolConfig {
        interface_kind: InterfaceKind::Serial,
        addressing: AddressingOptions {
            serial: Some(SerialSettings {
                port_name: port.to_string(),
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Default::default(),
            }),
            ..AddressingOptions::default()
        },
        ..protocol(id, cycle_ms)
    }
}

/// 进入 `publish` 后永不返回
pub struct StalledPublisher {
    entered: mpsc::UnboundedSender<String>,
}

impl StalledPublisher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (entered, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { entered }), rx)
    }
}

#[async_trait]
impl ResultPublisher for StalledPublisher {
    async fn publish(&self, topic: &str, _payload: Vec<u8>) -> bool {
        let _ = self.entered.send(topic.to_string());
        std::future::pending::<bool>().await
    }
}

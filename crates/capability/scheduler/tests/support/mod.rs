#![allow(dead_code)]

use async_trait::async_trait;
use domain::{
    AddressingOptions, DataType, Device, InterfaceKind, Point, PointValue, ProtocolConfig,
    ProtocolResult, SerialSettings,
};
use gw_protocol::{Driver, DriverRegistry, PointRequest, ProtocolError, ValueKind};
use gw_scheduler::ResultPublisher;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// 读写事件日志（`read:<address>` / `write:<address>`）
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().expect("log").push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().expect("log").clone()
    }
}

/// 测试驱动的共享控制面
#[derive(Clone, Default)]
pub struct Script {
    pub log: EventLog,
    pub read_delay: Duration,
    pub write_delay: Duration,
    pub fail_connect: Arc<AtomicBool>,
    /// 为真时所有读取返回超时
    pub failing: Arc<AtomicBool>,
    pub created: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub read_started: Option<mpsc::UnboundedSender<String>>,
    pub write_started: Option<mpsc::UnboundedSender<String>>,
}

pub struct ScriptedDriver {
    instance: usize,
    script: Script,
}

impl ScriptedDriver {
    pub fn new(script: &Script) -> Self {
        let instance = script.created.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            instance,
            script: script.clone(),
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn protocol_type(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn read(&self, request: &PointRequest) -> Result<PointValue, ProtocolError> {
        self.script.log.push(format!("read:{}", request.address));
        if let Some(started) = &self.script.read_started {
            let _ = started.send(request.address.clone());
        }
        if !self.script.read_delay.is_zero() {
            tokio::time::sleep(self.script.read_delay).await;
        }
        if request.address == "lost" {
            return Err(ProtocolError::Connection("link lost".to_string()));
        }
        if self.script.failing.load(Ordering::SeqCst) {
            return Err(ProtocolError::Timeout("no answer".to_string()));
        }
        Ok(match request.kind {
            ValueKind::I32 => PointValue::I32(self.instance as i32),
            ValueKind::F32 => PointValue::F32(1.5),
            ValueKind::String { .. } => PointValue::String("SN".to_string()),
            ValueKind::Bool => PointValue::Bool(true),
            _ => PointValue::U16(1),
        })
    }

    async fn write(&self, request: &PointRequest, _value: &PointValue) -> Result<(), ProtocolError> {
        self.script.log.push(format!("write:{}", request.address));
        if let Some(started) = &self.script.write_started {
            let _ = started.send(request.address.clone());
        }
        if !self.script.write_delay.is_zero() {
            tokio::time::sleep(self.script.write_delay).await;
        }
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
            Arc::new(ScriptedDriver::new(&script)) as Arc<dyn Driver>
        }),
    );
    registry
}

/// 把每次发布转发到通道
pub struct RecordingPublisher {
    tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl RecordingPublisher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        self.tx.send((topic.to_string(), payload)).is_ok()
    }
}

/// 进入 `publish` 后永不返回（模拟积压的消息通道）
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

pub async fn next_result(
    rx: &mut mpsc::UnboundedReceiver<(String, Vec<u8>)>,
) -> (String, serde_json::Value) {
    let (topic, payload) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("publish within 5s")
        .expect("publisher open");
    (topic, serde_json::from_slice(&payload).expect("json payload"))
}

pub fn parse_result(value: &serde_json::Value) -> ProtocolResult {
    serde_json::from_value(value.clone()).expect("protocol result")
}

pub fn device(equipment_id: &str, points: Vec<Point>) -> Device {
    Device {
        equipment_id: equipment_id.to_string(),
        points,
    }
}

pub fn int_points(addresses: &[&str]) -> Vec<Point> {
    addresses
        .iter()
        .map(|address| Point::new(format!("P{}", address), *address, DataType::Int32))
        .collect()
}

pub fn protocol(id: &str, cycle_ms: u64, devices: Vec<Device>) -> ProtocolConfig {
    ProtocolConfig {
        id: id.to_string(),
        interface_kind: Default::default(),
        protocol_type: "scripted".to_string(),
        collect_cycle_ms: cycle_ms,
        connect_timeout_ms: 1000,
        receive_timeout_ms: 1000,
        devices,
        addressing: Default::default(),
    }
}

pub fn serial_protocol(id: &str, port: &str, cycle_ms: u64, devices: Vec<Device>) -> ProtocolConfig {
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
        ..protocol(id, cycle_ms, devices)
    }
}

//! Modbus TCP / RTU 驱动
//!
//! 连接按需建立：首次读写或 `connect` 时打开，链路级错误后丢弃上下文，
//! 下次调用重新打开。RTU 驱动共享 [`SerialLine`]，同一串口上的请求由链路锁串行化。

use crate::codec::{decode, encode, parse_address, register_count, RegisterTable};
use crate::driver::Driver;
use crate::error::ProtocolError;
use crate::serial::{SerialLine, SerialLines};
use crate::types::{PointRequest, ValueKind};
use async_trait::async_trait;
use domain::{ByteOrder, PointValue, ProtocolConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::{
    client::{tcp, Client as _, Context, Reader, Writer},
    slave::{Slave, SlaveContext as _},
    ExceptionCode,
};
use tracing::{debug, info, warn};

const DEFAULT_TCP_PORT: u16 = 502;
const DEFAULT_STATION: u8 = 1;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// 驱动级设置（取自协议配置）
#[derive(Debug, Clone)]
struct ModbusSettings {
    connect_timeout: Duration,
    receive_timeout: Duration,
    station_no: u8,
    zero_based: bool,
    byte_order: ByteOrder,
}

impl ModbusSettings {
    fn from_config(config: &ProtocolConfig) -> Self {
        let non_zero = |d: Duration| if d.is_zero() { DEFAULT_TIMEOUT } else { d };
        Self {
            connect_timeout: non_zero(config.connect_timeout()),
            receive_timeout: non_zero(config.receive_timeout()),
            station_no: config.addressing.station_no.unwrap_or(DEFAULT_STATION),
            zero_based: config.addressing.zero_based,
            byte_order: config.addressing.byte_order.unwrap_or_default(),
        }
    }
}

enum Transport {
    Tcp {
        host: Option<String>,
        port: u16,
        link: Mutex<Option<Context>>,
    },
    Rtu {
        line: Option<Arc<SerialLine>>,
    },
}

enum Op {
    ReadCoils(u16),
    ReadDiscreteInputs(u16),
    ReadHoldingRegisters(u16, u16),
    ReadInputRegisters(u16, u16),
    WriteSingleCoil(u16, bool),
    WriteSingleRegister(u16, u16),
    WriteMultipleRegisters(u16, Vec<u16>),
}

impl Op {
    fn label(&self) -> &'static str {
        match self {
            Op::ReadCoils(_) => "read_coils",
            Op::ReadDiscreteInputs(_) => "read_discrete_inputs",
            Op::ReadHoldingRegisters(..) => "read_holding_registers",
            Op::ReadInputRegisters(..) => "read_input_registers",
            Op::WriteSingleCoil(..) => "write_single_coil",
            Op::WriteSingleRegister(..) => "write_single_register",
            Op::WriteMultipleRegisters(..) => "write_multiple_registers",
        }
    }
}

enum Reply {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Done,
}

async fn execute(
    ctx: &mut Context,
    op: Op,
) -> Result<Result<Reply, ExceptionCode>, tokio_modbus::Error> {
    let reply = match op {
        Op::ReadCoils(addr) => ctx.read_coils(addr, 1).await?.map(Reply::Bits),
        Op::ReadDiscreteInputs(addr) => ctx.read_discrete_inputs(addr, 1).await?.map(Reply::Bits),
        Op::ReadHoldingRegisters(addr, count) => ctx
            .read_holding_registers(addr, count)
            .await?
            .map(Reply::Words),
        Op::ReadInputRegisters(addr, count) => ctx
            .read_input_registers(addr, count)
            .await?
            .map(Reply::Words),
        Op::WriteSingleCoil(addr, bit) => ctx.write_single_coil(addr, bit).await?.map(|_| Reply::Done),
        Op::WriteSingleRegister(addr, word) => ctx
            .write_single_register(addr, word)
            .await?
            .map(|_| Reply::Done),
        Op::WriteMultipleRegisters(addr, words) => ctx
            .write_multiple_registers(addr, &words)
            .await?
            .map(|_| Reply::Done),
    };
    Ok(reply)
}

/// Modbus 驱动
pub struct ModbusDriver {
    protocol_type: String,
    settings: ModbusSettings,
    transport: Transport,
    attached: AtomicBool,
    closed: AtomicBool,
}

impl ModbusDriver {
    /// Modbus TCP 驱动，主机取自 `addressing.host`
    pub fn tcp(protocol_type: impl Into<String>, config: &ProtocolConfig) -> Self {
        Self::with_transport(
            protocol_type,
            config,
            Transport::Tcp {
                host: config.addressing.host.clone(),
                port: config.addressing.port.unwrap_or(DEFAULT_TCP_PORT),
                link: Mutex::new(None),
            },
        )
    }

    /// Modbus RTU 驱动，串口参数取自 `addressing.serial`
    pub fn rtu(
        protocol_type: impl Into<String>,
        config: &ProtocolConfig,
        lines: &SerialLines,
    ) -> Self {
        let line = config
            .addressing
            .serial
            .as_ref()
            .map(|settings| lines.line_for(settings));
        Self::with_transport(protocol_type, config, Transport::Rtu { line })
    }

    fn with_transport(
        protocol_type: impl Into<String>,
        config: &ProtocolConfig,
        transport: Transport,
    ) -> Self {
        Self {
            protocol_type: protocol_type.into(),
            settings: ModbusSettings::from_config(config),
            transport,
            attached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn link(&self) -> Result<&Mutex<Option<Context>>, ProtocolError> {
        match &self.transport {
            Transport::Tcp { link, .. } => Ok(link),
            Transport::Rtu { line: Some(line) } => Ok(&line.link),
            Transport::Rtu { line: None } => Err(ProtocolError::Config(
                "serial settings are not configured".to_string(),
            )),
        }
    }

    async fn open(&self) -> Result<Context, ProtocolError> {
        match &self.transport {
            Transport::Tcp { host, port, .. } => {
                let host = host
                    .as_deref()
                    .filter(|h| !h.trim().is_empty())
                    .ok_or_else(|| ProtocolError::Config("host is not configured".to_string()))?;
                let addr = tokio::net::lookup_host((host, *port))
                    .await?
                    .next()
                    .ok_or_else(|| {
                        ProtocolError::Config(format!("cannot resolve {}:{}", host, port))
                    })?;
                let ctx = timeout(self.settings.connect_timeout, tcp::connect(addr))
                    .await
                    .map_err(|_| {
                        ProtocolError::Connection(format!("connect to {} timed out", addr))
                    })?
                    .map_err(|e| ProtocolError::Connection(e.to_string()))?;
                info!(%addr, protocol_type = %self.protocol_type, "modbus_tcp_connected");
                Ok(ctx)
            }
            Transport::Rtu { line: Some(line) } => line.open(),
            Transport::Rtu { line: None } => Err(ProtocolError::Config(
                "serial settings are not configured".to_string(),
            )),
        }
    }

    fn ensure_open_flag(&self) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::Closed);
        }
        if let Transport::Rtu { line: Some(line) } = &self.transport {
            if !self.attached.swap(true, Ordering::AcqRel) {
                line.attach();
            }
        }
        Ok(())
    }

    async fn call(&self, station: u8, op: Op) -> Result<Reply, ProtocolError> {
        self.ensure_open_flag()?;
        let link = self.link()?;
        let mut guard = link.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(ctx) = guard.as_mut() else {
            return Err(ProtocolError::Closed);
        };
        ctx.set_slave(Slave(station));
        let label = op.label();
        let outcome = timeout(self.settings.receive_timeout, execute(ctx, op)).await;
        match outcome {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(code))) => Err(ProtocolError::Modbus(format!(
                "exception on {}: {:?}",
                label, code
            ))),
            Ok(Err(err)) => {
                warn!(op = label, station, error = %err, "modbus_transport_error");
                *guard = None;
                Err(ProtocolError::Connection(err.to_string()))
            }
            Err(_) => Err(ProtocolError::Timeout(format!(
                "{} exceeded {} ms",
                label,
                self.settings.receive_timeout.as_millis()
            ))),
        }
    }

    fn station(&self, request: &PointRequest) -> u8 {
        request.station_no.unwrap_or(self.settings.station_no)
    }

    fn byte_order(&self, request: &PointRequest) -> ByteOrder {
        request.byte_order.unwrap_or(self.settings.byte_order)
    }
}

#[async_trait]
impl Driver for ModbusDriver {
    fn protocol_type(&self) -> &str {
        &self.protocol_type
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        self.ensure_open_flag()?;
        let link = self.link()?;
        let mut guard = link.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }

    async fn read(&self, request: &PointRequest) -> Result<PointValue, ProtocolError> {
        let addr = parse_address(&request.address, self.settings.zero_based)?;
        let station = self.station(request);

        if addr.table.is_bit_table() {
            if request.kind != ValueKind::Bool {
                return Err(ProtocolError::Unsupported(format!(
                    "address {} holds bits, cannot read {}",
                    request.address,
                    request.kind.data_type()
                )));
            }
            let op = match addr.table {
                RegisterTable::Coil => Op::ReadCoils(addr.offset),
                _ => Op::ReadDiscreteInputs(addr.offset),
            };
            return match self.call(station, op).await? {
                Reply::Bits(bits) => bits
                    .first()
                    .copied()
                    .map(PointValue::Bool)
                    .ok_or_else(|| ProtocolError::DataParse("empty bit response".to_string())),
                _ => Err(ProtocolError::DataParse("unexpected response".to_string())),
            };
        }

        let count = register_count(request.kind);
        let op = match addr.table {
            RegisterTable::InputRegister => Op::ReadInputRegisters(addr.offset, count),
            _ => Op::ReadHoldingRegisters(addr.offset, count),
        };
        match self.call(station, op).await? {
            Reply::Words(words) => {
                debug!(station, offset = addr.offset, count, values = ?words, "read modbus registers");
                decode(&words, request.kind, self.byte_order(request))
            }
            _ => Err(ProtocolError::DataParse("unexpected response".to_string())),
        }
    }

    async fn write(&self, request: &PointRequest, value: &PointValue) -> Result<(), ProtocolError> {
        let addr = parse_address(&request.address, self.settings.zero_based)?;
        if !addr.table.is_writable() {
            return Err(ProtocolError::Unsupported(format!(
                "address {} is read-only",
                request.address
            )));
        }
        let station = self.station(request);
        let op = match addr.table {
            RegisterTable::Coil => match value {
                PointValue::Bool(bit) => Op::WriteSingleCoil(addr.offset, *bit),
                other => {
                    return Err(ProtocolError::Unsupported(format!(
                        "coil {} accepts bool only, got {}",
                        request.address,
                        other.data_type()
                    )));
                }
            },
            _ => {
                let mut words = encode(value, request.kind, self.byte_order(request))?;
                if words.len() == 1 {
                    Op::WriteSingleRegister(addr.offset, words.remove(0))
                } else {
                    Op::WriteMultipleRegisters(addr.offset, words)
                }
            }
        };
        self.call(station, op).await.map(|_| ())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.transport {
            Transport::Tcp { link, .. } => {
                if let Some(mut ctx) = link.lock().await.take() {
                    if let Err(err) = ctx.disconnect().await {
                        debug!(error = %err, "modbus_tcp_disconnect_failed");
                    }
                }
            }
            Transport::Rtu { line: Some(line) } => {
                if self.attached.swap(false, Ordering::AcqRel) {
                    line.detach().await;
                }
            }
            Transport::Rtu { line: None } => {}
        }
    }
}

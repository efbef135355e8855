//! 串口链路池
//!
//! 同一组串口参数只打开一次物理端口，由所有绑定到该端口的驱动共享；
//! 最后一个使用者释放时关闭端口。

use crate::error::ProtocolError;
use domain::{Parity, SerialSettings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio_modbus::client::{rtu, Client as _, Context};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// 共享串口链路
pub struct SerialLine {
    settings: SerialSettings,
    pub(crate) link: Mutex<Option<Context>>,
    users: AtomicUsize,
}

impl SerialLine {
    fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            link: Mutex::new(None),
            users: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// 当前绑定的驱动数量
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self) {
        let users = self.users.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(port = %self.settings.port_name, users, "serial_line_attached");
    }

    pub(crate) async fn detach(&self) {
        let previous = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous != 1 {
            return;
        }
        let mut guard = self.link.lock().await;
        if let Some(mut ctx) = guard.take() {
            if let Err(err) = ctx.disconnect().await {
                warn!(port = %self.settings.port_name, error = %err, "serial_line_close_failed");
            }
            info!(port = %self.settings.port_name, "serial_line_closed");
        }
    }

    /// 打开物理端口
    pub(crate) fn open(&self) -> Result<Context, ProtocolError> {
        let s = &self.settings;
        let data_bits = match s.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => return Err(ProtocolError::Config(format!("invalid data bits {}", other))),
        };
        let stop_bits = match s.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => return Err(ProtocolError::Config(format!("invalid stop bits {}", other))),
        };
        let parity = match s.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        let stream = tokio_serial::new(&s.port_name, s.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open_native_async()
            .map_err(|e| {
                ProtocolError::Connection(format!("failed to open serial port {}: {}", s.port_name, e))
            })?;
        info!(port = %s.port_name, baud_rate = s.baud_rate, "serial_line_opened");
        Ok(rtu::attach(stream))
    }
}

/// 串口链路池，以完整串口参数为键
#[derive(Default)]
pub struct SerialLines {
    lines: StdMutex<HashMap<SerialSettings, Arc<SerialLine>>>,
}

impl SerialLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得（必要时创建）串口参数对应的链路
    pub fn line_for(&self, settings: &SerialSettings) -> Arc<SerialLine> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines
            .entry(settings.clone())
            .or_insert_with(|| Arc::new(SerialLine::new(settings.clone())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

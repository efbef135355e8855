//! 单点执行器
//!
//! 对驱动做一次类型化读写，并把结果统一成 `PointResult`。
//! 只有链路级错误以 `Err` 返回，交给调用方决定设备级处理。

use crate::driver::Driver;
use crate::error::ProtocolError;
use crate::types::{PointRequest, ValueKind};
use domain::{Point, PointResult, PointValue};
use serde_json::Value;
use std::time::Instant;

/// 写入结果
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub ok: bool,
    pub message: Option<String>,
    /// 实际下发的值（类型转换后）
    pub value: Option<PointValue>,
    pub elapsed_ms: u64,
}

impl WriteOutcome {
    pub fn failed(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            value: None,
            elapsed_ms,
        }
    }

    pub fn into_point_result(self, point: &Point) -> PointResult {
        match (self.ok, self.value) {
            (true, Some(value)) => PointResult::ok(point, value, self.elapsed_ms),
            (_, _) => PointResult::failed(
                point,
                self.message.unwrap_or_else(|| "write failed".to_string()),
                self.elapsed_ms,
            ),
        }
    }
}

pub struct PointExecutor;

impl PointExecutor {
    /// 读取单个点位
    pub async fn read(driver: &dyn Driver, point: &Point) -> Result<PointResult, ProtocolError> {
        let started = Instant::now();
        let request = match PointRequest::for_point(point) {
            Ok(request) => request,
            Err(message) => return Ok(PointResult::failed(point, message, elapsed_ms(started))),
        };
        match driver.read(&request).await {
            Ok(value) if value.matches(&point.data_type) => {
                Ok(PointResult::ok(point, value, elapsed_ms(started)))
            }
            Ok(value) => Ok(PointResult::failed(
                point,
                format!(
                    "driver returned {} for dataType {}",
                    value.data_type(),
                    point.data_type
                ),
                elapsed_ms(started),
            )),
            Err(err) if err.is_connection() => Err(err),
            Err(err) => Ok(PointResult::failed(point, err.to_string(), elapsed_ms(started))),
        }
    }

    /// 写入单个点位，任何失败都收进 `WriteOutcome`
    pub async fn write(driver: &dyn Driver, point: &Point, value: &Value) -> WriteOutcome {
        let started = Instant::now();
        let request = match PointRequest::for_point(point) {
            Ok(request) => request,
            Err(message) => return WriteOutcome::failed(message, elapsed_ms(started)),
        };
        let typed = match coerce(request.kind, value) {
            Ok(typed) => typed,
            Err(message) => {
                return WriteOutcome::failed(
                    format!("point {}: {}", point.label, message),
                    elapsed_ms(started),
                );
            }
        };
        match driver.write(&request, &typed).await {
            Ok(()) => WriteOutcome {
                ok: true,
                message: None,
                value: Some(typed),
                elapsed_ms: elapsed_ms(started),
            },
            Err(err) => WriteOutcome::failed(err.to_string(), elapsed_ms(started)),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// 把 JSON 值转换为点位声明的类型
pub fn coerce(kind: ValueKind, value: &Value) -> Result<PointValue, String> {
    let typed = match kind {
        ValueKind::Bool => PointValue::Bool(coerce_bool(value)?),
        ValueKind::I16 => PointValue::I16(integer(value, kind)?),
        ValueKind::U16 => PointValue::U16(integer(value, kind)?),
        ValueKind::I32 => PointValue::I32(integer(value, kind)?),
        ValueKind::U32 => PointValue::U32(integer(value, kind)?),
        ValueKind::I64 => PointValue::I64(integer(value, kind)?),
        ValueKind::U64 => {
            let number = match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            PointValue::U64(number.ok_or_else(|| invalid(value, kind))?)
        }
        ValueKind::F32 => {
            let number = float(value).ok_or_else(|| invalid(value, kind))?;
            if number.is_finite() && number.abs() > f32::MAX as f64 {
                return Err(format!("{} out of range for {}", number, kind.data_type()));
            }
            PointValue::F32(number as f32)
        }
        ValueKind::F64 => PointValue::F64(float(value).ok_or_else(|| invalid(value, kind))?),
        ValueKind::String { length } => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(invalid(value, kind)),
            };
            if text.len() > length as usize {
                return Err(format!(
                    "string of {} bytes exceeds length {}",
                    text.len(),
                    length
                ));
            }
            PointValue::String(text)
        }
    };
    Ok(typed)
}

fn coerce_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => n
            .as_f64()
            .map(|v| v != 0.0)
            .ok_or_else(|| invalid(value, ValueKind::Bool)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Ok(true),
            "false" | "0" | "off" => Ok(false),
            _ => Err(invalid(value, ValueKind::Bool)),
        },
        _ => Err(invalid(value, ValueKind::Bool)),
    }
}

fn integer<T: TryFrom<i64>>(value: &Value, kind: ValueKind) -> Result<T, String> {
    let number = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
    .ok_or_else(|| invalid(value, kind))?;
    T::try_from(number).map_err(|_| format!("{} out of range for {}", number, kind.data_type()))
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn invalid(value: &Value, kind: ValueKind) -> String {
    format!("cannot convert {} to {}", value, kind.data_type())
}

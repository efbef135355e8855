//! 采集结果（点位 / 设备 / 协议三级）。

use crate::config::{Device, Point, ProtocolConfig};
use crate::data::{DataType, PointValue, now_epoch_ms};
use serde::{Deserialize, Serialize};

/// 单次读写的结果。
///
/// `success` 为真时 `value` 有意义，否则 `error_message` 有意义；失败时仍保留声明的数据类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointResult {
    pub label: String,
    pub address: String,
    pub data_type: DataType,
    pub success: bool,
    pub value: Option<PointValue>,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
}

impl PointResult {
    pub fn ok(point: &Point, value: PointValue, elapsed_ms: u64) -> Self {
        Self {
            label: point.label.clone(),
            address: point.address.clone(),
            data_type: point.data_type.clone(),
            success: true,
            value: Some(value),
            error_message: None,
            elapsed_ms,
        }
    }

    pub fn failed(point: &Point, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            label: point.label.clone(),
            address: point.address.clone(),
            data_type: point.data_type.clone(),
            success: false,
            value: None,
            error_message: Some(message.into()),
            elapsed_ms,
        }
    }
}

/// 设备级结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResult {
    pub equipment_id: String,
    pub point_results: Vec<PointResult>,
    pub success: bool,
    pub error_message: Option<String>,
    pub total_points: usize,
    pub success_points: usize,
    pub failed_points: usize,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub elapsed_ms: u64,
}

impl DeviceResult {
    pub fn begin(equipment_id: impl Into<String>) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            point_results: Vec::new(),
            success: false,
            error_message: None,
            total_points: 0,
            success_points: 0,
            failed_points: 0,
            start_time_ms: now_epoch_ms(),
            end_time_ms: 0,
            elapsed_ms: 0,
        }
    }

    pub fn push(&mut self, result: PointResult) {
        self.point_results.push(result);
    }

    /// 设备级失败：丢弃已有点位明细，按配置点位逐一生成同一错误信息的失败项。
    pub fn fail_all(&mut self, device: &Device, message: impl Into<String>) {
        let message = message.into();
        self.point_results = device
            .points
            .iter()
            .map(|point| PointResult::failed(point, message.clone(), 0))
            .collect();
        self.error_message = Some(message);
    }

    /// 统计并封口。
    pub fn finish(&mut self) {
        self.total_points = self.point_results.len();
        self.success_points = self.point_results.iter().filter(|r| r.success).count();
        self.failed_points = self.total_points - self.success_points;
        self.success = self.error_message.is_none() && self.failed_points == 0;
        self.end_time_ms = now_epoch_ms();
        self.elapsed_ms = self.end_time_ms.saturating_sub(self.start_time_ms).max(0) as u64;
    }
}

/// 协议级结果（每周期发布一次）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolResult {
    pub protocol_id: String,
    pub protocol_type: String,
    pub device_results: Vec<DeviceResult>,
    pub success: bool,
    pub total_devices: usize,
    pub success_devices: usize,
    pub failed_devices: usize,
    pub total_points: usize,
    pub success_points: usize,
    pub failed_points: usize,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub elapsed_ms: u64,
}

impl ProtocolResult {
    pub fn begin(config: &ProtocolConfig) -> Self {
        Self {
            protocol_id: config.id.clone(),
            protocol_type: config.protocol_type.clone(),
            device_results: Vec::new(),
            success: false,
            total_devices: 0,
            success_devices: 0,
            failed_devices: 0,
            total_points: 0,
            success_points: 0,
            failed_points: 0,
            start_time_ms: now_epoch_ms(),
            end_time_ms: 0,
            elapsed_ms: 0,
        }
    }

    pub fn push(&mut self, device: DeviceResult) {
        self.device_results.push(device);
    }

    pub fn finish(&mut self) {
        self.total_devices = self.device_results.len();
        self.success_devices = self.device_results.iter().filter(|d| d.success).count();
        self.failed_devices = self.total_devices - self.success_devices;
        self.total_points = self.device_results.iter().map(|d| d.total_points).sum();
        self.success_points = self.device_results.iter().map(|d| d.success_points).sum();
        self.failed_points = self.device_results.iter().map(|d| d.failed_points).sum();
        self.success = self.failed_devices == 0 && self.failed_points == 0;
        self.end_time_ms = now_epoch_ms();
        self.elapsed_ms = self.end_time_ms.saturating_sub(self.start_time_ms).max(0) as u64;
    }

    /// 本周期是否全部点位失败（没有点位时不算）。
    pub fn all_points_failed(&self) -> bool {
        self.total_points > 0 && self.success_points == 0
    }
}

//! 写入任务与执行回显。

use crate::data::DataType;
use crate::result::PointResult;
use serde::{Deserialize, Serialize};

/// 单个写入目标：按标签（其次地址）匹配配置中的点位。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTarget {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub address: Option<String>,
    /// 配置中找不到点位时使用的数据类型
    #[serde(default)]
    pub data_type: Option<DataType>,
    pub value: serde_json::Value,
}

/// 写入任务：由命令接入创建，只被消费一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTask {
    #[serde(default)]
    pub task_id: String,
    pub protocol_id: String,
    #[serde(alias = "points")]
    pub targets: Vec<WriteTarget>,
}

/// 写入执行回显。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReport {
    pub task_id: String,
    pub protocol_id: String,
    pub success: bool,
    pub point_results: Vec<PointResult>,
    pub elapsed_ms: u64,
}

impl WriteReport {
    pub fn new(task: &WriteTask, point_results: Vec<PointResult>, elapsed_ms: u64) -> Self {
        let success = !point_results.is_empty() && point_results.iter().all(|r| r.success);
        Self {
            task_id: task.task_id.clone(),
            protocol_id: task.protocol_id.clone(),
            success,
            point_results,
            elapsed_ms,
        }
    }
}

//! 协议配置源
//!
//! 配置文件格式：`{"savedAt": <epoch ms>, "protocols": [ProtocolConfig...]}`。
//! 缺少 `savedAt` 时以文件修改时间作为版本。

use crate::ConfigError;
use async_trait::async_trait;
use domain::{ProtocolConfig, now_epoch_ms};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// 一次保存的完整协议配置
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    /// 保存时间（epoch 毫秒），用作配置版本
    pub saved_at: i64,
    pub protocols: Vec<ProtocolConfig>,
}

impl ConfigSnapshot {
    pub fn find(&self, protocol_id: &str) -> Option<&ProtocolConfig> {
        self.protocols.iter().find(|p| p.id == protocol_id)
    }
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 最新保存的配置；尚无配置时返回 `None`
    async fn latest(&self) -> Result<Option<ConfigSnapshot>, ConfigError>;

    /// 最新配置的版本是否与 `saved_at` 不同
    async fn has_changed(&self, saved_at: i64) -> Result<bool, ConfigError> {
        let current = self.latest().await?.map(|s| s.saved_at);
        Ok(current.is_some_and(|current| current != saved_at))
    }
}

/// 协议配置中为 0 的周期 / 超时字段的替代值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDefaults {
    pub collect_cycle_ms: u64,
    pub connect_timeout_ms: u64,
    pub receive_timeout_ms: u64,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            collect_cycle_ms: 1000,
            connect_timeout_ms: 3000,
            receive_timeout_ms: 3000,
        }
    }
}

impl ConfigDefaults {
    pub fn apply(&self, config: &mut ProtocolConfig) {
        if config.collect_cycle_ms == 0 {
            config.collect_cycle_ms = self.collect_cycle_ms;
        }
        if config.connect_timeout_ms == 0 {
            config.connect_timeout_ms = self.connect_timeout_ms;
        }
        if config.receive_timeout_ms == 0 {
            config.receive_timeout_ms = self.receive_timeout_ms;
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    saved_at: Option<i64>,
    #[serde(default)]
    protocols: Vec<ProtocolConfig>,
}

/// 基于 JSON 文件的配置源
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    defaults: ConfigDefaults,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, defaults: ConfigDefaults) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn modified_ms(&self) -> Result<i64, ConfigError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|err| ConfigError::Io(format!("{}: {}", self.path.display(), err)))?;
        let modified = metadata
            .modified()
            .map_err(|err| ConfigError::Io(err.to_string()))?;
        let ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(ms)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn latest(&self) -> Result<Option<ConfigSnapshot>, ConfigError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "config_file_missing");
                return Ok(None);
            }
            Err(err) => {
                return Err(ConfigError::Io(format!("{}: {}", self.path.display(), err)));
            }
        };
        let file: ConfigFile = serde_json::from_slice(&bytes)
            .map_err(|err| ConfigError::Parse(format!("{}: {}", self.path.display(), err)))?;
        let saved_at = match file.saved_at {
            Some(saved_at) => saved_at,
            None => self.modified_ms().await?,
        };
        let mut protocols = file.protocols;
        for config in &mut protocols {
            self.defaults.apply(config);
        }
        Ok(Some(ConfigSnapshot {
            saved_at,
            protocols,
        }))
    }
}

/// 内存配置源，配置由调用方整体替换
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    snapshot: RwLock<Option<ConfigSnapshot>>,
}

impl StaticConfigSource {
    pub fn new(protocols: Vec<ProtocolConfig>) -> Self {
        let source = Self::default();
        source.replace(protocols);
        source
    }

    /// 替换全部协议配置，返回新版本号
    pub fn replace(&self, protocols: Vec<ProtocolConfig>) -> i64 {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let previous = snapshot.as_ref().map(|s| s.saved_at).unwrap_or_default();
        let saved_at = now_epoch_ms().max(previous + 1);
        *snapshot = Some(ConfigSnapshot {
            saved_at,
            protocols,
        });
        saved_at
    }

    pub fn clear(&self) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn latest(&self) -> Result<Option<ConfigSnapshot>, ConfigError> {
        Ok(self
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

//! 应用运行配置加载与协议配置源。

mod source;

pub use source::{ConfigDefaults, ConfigSnapshot, ConfigSource, FileConfigSource, StaticConfigSource};

use std::collections::HashMap;
use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("config io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: String,
    pub config_poll_interval_ms: u64,
    pub default_collect_cycle_ms: u64,
    pub default_connect_timeout_ms: u64,
    pub default_receive_timeout_ms: u64,
    /// `bus` 或 `point`
    pub serial_arbitration: String,
    /// 协议类型（小写）→ 点位间隔（毫秒）
    pub point_delays_ms: HashMap<String, u64>,
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_qos: u8,
    pub mqtt_result_topic_prefix: String,
    pub mqtt_write_echo_topic_prefix: String,
    pub mqtt_command_topic_prefix: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_path =
            env::var("GW_CONFIG_PATH").unwrap_or_else(|_| "config/protocols.json".to_string());
        let config_poll_interval_ms = read_u64_with_default("GW_CONFIG_POLL_INTERVAL_MS", 5000)?;
        let default_collect_cycle_ms = read_u64_with_default("GW_DEFAULT_COLLECT_CYCLE_MS", 1000)?;
        let default_connect_timeout_ms =
            read_u64_with_default("GW_DEFAULT_CONNECT_TIMEOUT_MS", 3000)?;
        let default_receive_timeout_ms =
            read_u64_with_default("GW_DEFAULT_RECEIVE_TIMEOUT_MS", 3000)?;
        let serial_arbitration = read_choice("GW_SERIAL_ARBITRATION", &["bus", "point"], "bus")?;
        let point_delays_ms = match read_optional("GW_POINT_DELAY_MS") {
            Some(value) => parse_point_delays(&value)
                .ok_or_else(|| ConfigError::Invalid("GW_POINT_DELAY_MS".to_string(), value))?,
            None => HashMap::new(),
        };
        let mqtt_enabled = read_bool_with_default("GW_MQTT", false);
        let mqtt_host = env::var("GW_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("GW_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("GW_MQTT_USERNAME");
        let mqtt_password = read_optional("GW_MQTT_PASSWORD");
        let mqtt_qos = read_u8_with_default("GW_MQTT_QOS", 1)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "GW_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }
        let mqtt_result_topic_prefix = env::var("GW_MQTT_RESULT_TOPIC_PREFIX")
            .unwrap_or_else(|_| "gateway/data".to_string());
        let mqtt_write_echo_topic_prefix = env::var("GW_MQTT_WRITE_ECHO_TOPIC_PREFIX")
            .unwrap_or_else(|_| "gateway/write-echo".to_string());
        let mqtt_command_topic_prefix = env::var("GW_MQTT_COMMAND_TOPIC_PREFIX")
            .unwrap_or_else(|_| "gateway/commands".to_string());

        Ok(Self {
            config_path,
            config_poll_interval_ms,
            default_collect_cycle_ms,
            default_connect_timeout_ms,
            default_receive_timeout_ms,
            serial_arbitration,
            point_delays_ms,
            mqtt_enabled,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_qos,
            mqtt_result_topic_prefix,
            mqtt_write_echo_topic_prefix,
            mqtt_command_topic_prefix,
        })
    }

    /// 协议配置缺省值。
    pub fn config_defaults(&self) -> ConfigDefaults {
        ConfigDefaults {
            collect_cycle_ms: self.default_collect_cycle_ms,
            connect_timeout_ms: self.default_connect_timeout_ms,
            receive_timeout_ms: self.default_receive_timeout_ms,
        }
    }
}

/// 解析 `dlt645=200,cjt188=100` 形式的点位间隔。
pub fn parse_point_delays(value: &str) -> Option<HashMap<String, u64>> {
    let mut delays = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (protocol_type, ms) = entry.split_once('=')?;
        let protocol_type = protocol_type.trim().to_ascii_lowercase();
        if protocol_type.is_empty() {
            return None;
        }
        delays.insert(protocol_type, ms.trim().parse::<u64>().ok()?);
    }
    Some(delays)
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_choice(key: &str, choices: &[&str], default: &str) -> Result<String, ConfigError> {
    let Some(value) = read_optional(key) else {
        return Ok(default.to_string());
    };
    let normalized = value.trim().to_ascii_lowercase();
    if choices.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(ConfigError::Invalid(key.to_string(), value))
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

//! 驱动注册表
//!
//! 启动时构建的静态表：协议类型标签 → 驱动工厂。注册表只负责创建，不持有实例。

use crate::driver::Driver;
use crate::modbus::ModbusDriver;
use crate::serial::SerialLines;
use domain::ProtocolConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// 驱动工厂
pub type DriverFactory = Arc<dyn Fn(&ProtocolConfig) -> Arc<dyn Driver> + Send + Sync>;

/// Modbus TCP 标签
pub const MODBUS_TCP_TAGS: &[&str] = &["modbustcp", "modbus-tcp", "modbus_tcp"];
/// Modbus RTU 标签
pub const MODBUS_RTU_TAGS: &[&str] = &["modbusrtu", "modbus-rtu", "modbus_rtu"];

#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

fn normalize(protocol_type: &str) -> String {
    protocol_type.trim().to_ascii_lowercase()
}

impl DriverRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置驱动：Modbus TCP / Modbus RTU
    pub fn builtin(lines: Arc<SerialLines>) -> Self {
        let mut registry = Self::new();
        registry.register(
            MODBUS_TCP_TAGS,
            Arc::new(|config: &ProtocolConfig| {
                Arc::new(ModbusDriver::tcp(config.protocol_type.clone(), config)) as Arc<dyn Driver>
            }),
        );
        registry.register(
            MODBUS_RTU_TAGS,
            Arc::new(move |config: &ProtocolConfig| {
                Arc::new(ModbusDriver::rtu(config.protocol_type.clone(), config, &lines))
                    as Arc<dyn Driver>
            }),
        );
        registry
    }

    /// 以一个或多个标签注册工厂，后注册者覆盖先注册者
    pub fn register(&mut self, tags: &[&str], factory: DriverFactory) {
        for tag in tags {
            self.factories.insert(normalize(tag), factory.clone());
        }
    }

    pub fn supports(&self, protocol_type: &str) -> bool {
        self.factories.contains_key(&normalize(protocol_type))
    }

    /// 为协议配置创建新的驱动实例；未实现的协议类型返回 `None`
    pub fn create(&self, config: &ProtocolConfig) -> Option<Arc<dyn Driver>> {
        let factory = self.factories.get(&normalize(&config.protocol_type))?;
        Some(factory(config))
    }

    /// 已注册的标签（排序后）
    pub fn protocol_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("protocol_types", &self.protocol_types())
            .finish()
    }
}

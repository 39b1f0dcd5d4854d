//! # 南向驱动能力模块
//!
//! 采集引擎通过 [`Driver`] 契约访问设备，支持：
//! - **MODBUS-TCP**：线圈/离散输入/保持寄存器/输入寄存器
//! - **MQTT**：订阅设备上报，发布写值
//! - **VIRTUAL**：进程内寄存器库
//!
//! ## 架构设计
//!
//! ```text
//! Slot (driver + params)
//!       │
//!       ▼
//! DriverRegistry ──► DriverFactory::connect(params)
//!                          │
//!                          ▼
//!                    Box<dyn Driver>  (read / write / close)
//! ```
//!
//! ## 参数格式
//!
//! ### Modbus TCP
//! ```json
//! // slot.params
//! { "host": "192.168.1.100", "port": 502, "slave_id": 1 }
//! // tag.address
//! "3:100"
//! ```
//!
//! ### MQTT
//! ```json
//! // slot.params
//! { "host": "broker", "device": "meter-1", "topic_prefix": "ems/dev" }
//! // tag.address 为 data 对象中的键
//! ```

mod driver;
mod error;
mod modbus_tcp;
mod mqtt;
mod types;
mod virtual_driver;

pub use driver::{Driver, DriverFactory, DriverRegistry};
pub use error::ProtocolError;
pub use modbus_tcp::{MODBUS_TCP, ModbusTcpDriver, ModbusTcpFactory, ModbusTcpParams};
pub use mqtt::{MQTT, MqttDriver, MqttFactory, MqttParams, json_to_value, value_to_json};
pub use types::*;
pub use virtual_driver::{VIRTUAL, VirtualBank, VirtualDriver, VirtualFactory};

use std::sync::Arc;

/// 注册全部内置驱动
pub fn builtin_drivers() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(ModbusTcpFactory));
    registry.register(Arc::new(MqttFactory));
    registry.register(Arc::new(VirtualFactory::new()));
    registry
}

//! Modbus TCP 驱动
//!
//! 每个标签按 `address` 解析出功能码与起始寄存器，按数据类型决定寄存器数量，
//! 多字寄存器按大端字序拼接。每次请求受 `read_timeout_ms` 约束。
//!
//! ## 参数示例
//!
//! ```json
//! // slot.params
//! { "host": "192.168.1.100", "port": 502, "slave_id": 1 }
//!
//! // tag.address
//! "3:100"
//! { "function_code": 3, "register_address": 100 }
//! ```

use crate::driver::{Driver, DriverFactory};
use crate::error::ProtocolError;
use crate::types::{
    ModbusFunctionCode, ModbusPointDetail, coerce_value, decode_registers, encode_registers,
    register_count,
};
use async_trait::async_trait;
use domain::{DataType, Tag, TagValue};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::ExceptionCode;
use tokio_modbus::client::{Client as _, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

pub const MODBUS_TCP: &str = "MODBUS-TCP";

/// Modbus TCP 槽位参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpParams {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 从站 ID
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 单次请求超时（毫秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_slave_id() -> u8 {
    1
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    3000
}

impl ModbusTcpParams {
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }
}

/// Modbus TCP 驱动工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct ModbusTcpFactory;

#[async_trait]
impl DriverFactory for ModbusTcpFactory {
    fn name(&self) -> &str {
        MODBUS_TCP
    }

    async fn connect(&self, params: &str) -> Result<Box<dyn Driver>, ProtocolError> {
        let params = ModbusTcpParams::from_json(params)?;
        let driver = ModbusTcpDriver::connect(params).await?;
        Ok(Box::new(driver))
    }
}

/// 已连接的 Modbus TCP 驱动
pub struct ModbusTcpDriver {
    ctx: Option<Context>,
    request_timeout: Duration,
}

impl ModbusTcpDriver {
    pub async fn connect(params: ModbusTcpParams) -> Result<Self, ProtocolError> {
        let connect_timeout = Duration::from_millis(params.connect_timeout_ms);
        let endpoint = format!("{}:{}", params.host, params.port);
        // 域名解析与建连共用同一个超时
        let (addr, ctx) = timeout(connect_timeout, async {
            let addr = tokio::net::lookup_host((params.host.as_str(), params.port))
                .await?
                .next()
                .ok_or_else(|| {
                    ProtocolError::ConfigParse(format!("unresolved host: {}", params.host))
                })?;
            let ctx = tcp::connect_slave(addr, Slave(params.slave_id))
                .await
                .map_err(|e| ProtocolError::Connection(e.to_string()))?;
            Ok::<_, ProtocolError>((addr, ctx))
        })
        .await
        .map_err(|_| ProtocolError::Timeout(format!("connect {}", endpoint)))??;

        info!(target: "ems.protocol", addr = %addr, slave = params.slave_id, "modbus_connected");
        Ok(Self {
            ctx: Some(ctx),
            request_timeout: Duration::from_millis(params.read_timeout_ms),
        })
    }

    fn context(&mut self) -> Result<&mut Context, ProtocolError> {
        self.ctx.as_mut().ok_or(ProtocolError::Closed)
    }

    async fn read_one(&mut self, tag: &Tag) -> Result<TagValue, ProtocolError> {
        let detail = ModbusPointDetail::parse(&tag.address)?;
        let count = if detail.function().is_bit() {
            1
        } else {
            register_count(tag.data_type)?
        };
        let limit = self.request_timeout;
        let address = detail.register_address;
        let ctx = self.context()?;

        let value = match detail.function() {
            ModbusFunctionCode::ReadCoils => {
                let bits = bounded(limit, "read_coils", ctx.read_coils(address, 1)).await?;
                TagValue::Bool(bits.first().copied().unwrap_or(false))
            }
            ModbusFunctionCode::ReadDiscreteInputs => {
                let bits =
                    bounded(limit, "read_discrete_inputs", ctx.read_discrete_inputs(address, 1))
                        .await?;
                TagValue::Bool(bits.first().copied().unwrap_or(false))
            }
            ModbusFunctionCode::ReadHoldingRegisters => {
                let registers = bounded(
                    limit,
                    "read_holding_registers",
                    ctx.read_holding_registers(address, count),
                )
                .await?;
                decode_registers(tag.data_type, &registers)?
            }
            ModbusFunctionCode::ReadInputRegisters => {
                let registers = bounded(
                    limit,
                    "read_input_registers",
                    ctx.read_input_registers(address, count),
                )
                .await?;
                decode_registers(tag.data_type, &registers)?
            }
        };

        // 位访问的布尔值按标签类型转换
        if detail.function().is_bit() && tag.data_type != DataType::Bool {
            return coerce_value(&value, tag.data_type).ok_or_else(|| {
                ProtocolError::DataParse(format!("bit into {:?}", tag.data_type))
            });
        }
        Ok(value)
    }

    async fn write_one(&mut self, tag: &Tag) -> Result<(), ProtocolError> {
        let detail = ModbusPointDetail::parse(&tag.address)?;
        let function = detail.function();
        if !function.is_writable() {
            return Err(ProtocolError::Unsupported(format!(
                "write with function code {}",
                detail.function_code
            )));
        }
        let value = tag
            .value
            .as_ref()
            .and_then(|value| coerce_value(value, tag.data_type))
            .ok_or_else(|| ProtocolError::DataParse(format!("no writable value: {}", tag.id)))?;
        let registers = if function.is_bit() {
            Vec::new()
        } else {
            encode_registers(&value)?
        };
        let limit = self.request_timeout;
        let address = detail.register_address;
        let ctx = self.context()?;

        if function.is_bit() {
            let bit = value.as_f64().is_some_and(|v| v != 0.0);
            bounded(limit, "write_single_coil", ctx.write_single_coil(address, bit)).await
        } else {
            bounded(
                limit,
                "write_multiple_registers",
                ctx.write_multiple_registers(address, &registers),
            )
            .await
        }
    }
}

#[async_trait]
impl Driver for ModbusTcpDriver {
    fn name(&self) -> &str {
        MODBUS_TCP
    }

    /// 单个标签的配置或数据错误只跳过该标签（值留空），链路错误才返回。
    async fn read(&mut self, tags: &mut [Tag]) -> Result<(), ProtocolError> {
        for tag in tags.iter_mut() {
            match self.read_one(tag).await {
                Ok(value) => {
                    debug!(target: "ems.protocol", tag_id = %tag.id, value = %value, "modbus_read");
                    tag.value = Some(value);
                }
                Err(err) if err.is_transport() => return Err(err),
                Err(err) => {
                    warn!(target: "ems.protocol", tag_id = %tag.id, address = %tag.address, error = %err, "modbus_tag_skipped");
                    tag.value = None;
                }
            }
        }
        Ok(())
    }

    async fn write(&mut self, tags: &[Tag]) -> Result<(), ProtocolError> {
        for tag in tags {
            match self.write_one(tag).await {
                Ok(()) => {}
                Err(err) if err.is_transport() => return Err(err),
                Err(err) => {
                    warn!(target: "ems.protocol", tag_id = %tag.id, address = %tag.address, error = %err, "modbus_write_skipped");
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = timeout(self.request_timeout, ctx.disconnect()).await;
        }
        Ok(())
    }
}

/// 带超时的 Modbus 请求，拆开传输错误与异常码
async fn bounded<T, F>(limit: Duration, op: &str, fut: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<Result<T, ExceptionCode>, tokio_modbus::Error>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| ProtocolError::Timeout(op.to_string()))?
        .map_err(|e| ProtocolError::Modbus(e.to_string()))?
        .map_err(|e| ProtocolError::Exception(format!("{} on {}", e, op)))
}

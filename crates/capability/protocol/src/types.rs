//! 协议相关类型定义

use crate::error::ProtocolError;
use domain::{DataType, TagValue};
use serde::{Deserialize, Serialize};

/// Modbus 功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModbusFunctionCode {
    /// 读线圈状态 (0x01)，可写
    ReadCoils = 1,
    /// 读离散输入 (0x02)
    ReadDiscreteInputs = 2,
    /// 读保持寄存器 (0x03)，可写
    #[default]
    ReadHoldingRegisters = 3,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters = 4,
}

impl ModbusFunctionCode {
    /// 位访问（线圈/离散输入）
    pub fn is_bit(self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadHoldingRegisters)
    }
}

impl TryFrom<u8> for ModbusFunctionCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::ReadCoils),
            2 => Ok(Self::ReadDiscreteInputs),
            3 => Ok(Self::ReadHoldingRegisters),
            4 => Ok(Self::ReadInputRegisters),
            other => Err(ProtocolError::Unsupported(format!(
                "function code: {}",
                other
            ))),
        }
    }
}

/// 点位协议详情（Modbus），对应 `Tag::address`
///
/// 支持两种写法：`"3:100"` 或 `{"function_code": 3, "register_address": 100}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusPointDetail {
    /// 功能码
    #[serde(default = "default_function_code")]
    pub function_code: u8,
    /// 寄存器起始地址
    pub register_address: u16,
}

fn default_function_code() -> u8 {
    3
}

impl ModbusPointDetail {
    pub fn parse(address: &str) -> Result<Self, ProtocolError> {
        let address = address.trim();
        let detail = if address.starts_with('{') {
            serde_json::from_str::<Self>(address)
                .map_err(|e| ProtocolError::ConfigParse(format!("point detail: {}", e)))?
        } else {
            let (function, register) = address.split_once(':').ok_or_else(|| {
                ProtocolError::ConfigParse(format!("invalid address: {}", address))
            })?;
            Self {
                function_code: function.trim().parse().map_err(|_| {
                    ProtocolError::ConfigParse(format!("invalid function code: {}", address))
                })?,
                register_address: register.trim().parse().map_err(|_| {
                    ProtocolError::ConfigParse(format!("invalid register: {}", address))
                })?,
            }
        };
        ModbusFunctionCode::try_from(detail.function_code)?;
        Ok(detail)
    }

    pub fn function(&self) -> ModbusFunctionCode {
        ModbusFunctionCode::try_from(self.function_code).unwrap_or_default()
    }
}

/// 数据类型占用的寄存器数量
pub fn register_count(data_type: DataType) -> Result<u16, ProtocolError> {
    match data_type {
        DataType::Bool | DataType::I8 | DataType::U8 | DataType::I16 | DataType::U16 => Ok(1),
        DataType::I32 | DataType::U32 | DataType::F32 => Ok(2),
        DataType::I64 | DataType::U64 | DataType::F64 => Ok(4),
        DataType::String => Err(ProtocolError::Unsupported(
            "string over registers".to_string(),
        )),
    }
}

/// 大端字序解析寄存器
pub fn decode_registers(data_type: DataType, registers: &[u16]) -> Result<TagValue, ProtocolError> {
    let need = register_count(data_type)? as usize;
    if registers.len() < need {
        return Err(ProtocolError::DataParse(format!(
            "need {} registers for {:?}, got {}",
            need,
            data_type,
            registers.len()
        )));
    }
    let word32 = || ((registers[0] as u32) << 16) | registers[1] as u32;
    let word64 = || {
        registers[..4]
            .iter()
            .fold(0u64, |acc, r| (acc << 16) | *r as u64)
    };

    let value = match data_type {
        DataType::Bool => TagValue::Bool(registers[0] != 0),
        DataType::I8 => TagValue::I8(registers[0] as i8),
        DataType::U8 => TagValue::U8(registers[0] as u8),
        DataType::I16 => TagValue::I16(registers[0] as i16),
        DataType::U16 => TagValue::U16(registers[0]),
        DataType::I32 => TagValue::I32(word32() as i32),
        DataType::U32 => TagValue::U32(word32()),
        DataType::F32 => TagValue::F32(f32::from_bits(word32())),
        DataType::I64 => TagValue::I64(word64() as i64),
        DataType::U64 => TagValue::U64(word64()),
        DataType::F64 => TagValue::F64(f64::from_bits(word64())),
        DataType::String => {
            return Err(ProtocolError::Unsupported(
                "string over registers".to_string(),
            ));
        }
    };
    Ok(value)
}

/// 大端字序编码为寄存器
pub fn encode_registers(value: &TagValue) -> Result<Vec<u16>, ProtocolError> {
    let split32 = |bits: u32| vec![(bits >> 16) as u16, bits as u16];
    let split64 = |bits: u64| {
        vec![
            (bits >> 48) as u16,
            (bits >> 32) as u16,
            (bits >> 16) as u16,
            bits as u16,
        ]
    };

    let registers = match value {
        TagValue::Bool(v) => vec![u16::from(*v)],
        TagValue::I8(v) => vec![*v as i16 as u16],
        TagValue::U8(v) => vec![u16::from(*v)],
        TagValue::I16(v) => vec![*v as u16],
        TagValue::U16(v) => vec![*v],
        TagValue::I32(v) => split32(*v as u32),
        TagValue::U32(v) => split32(*v),
        TagValue::F32(v) => split32(v.to_bits()),
        TagValue::I64(v) => split64(*v as u64),
        TagValue::U64(v) => split64(*v),
        TagValue::F64(v) => split64(v.to_bits()),
        TagValue::String(_) => {
            return Err(ProtocolError::Unsupported(
                "string over registers".to_string(),
            ));
        }
    };
    Ok(registers)
}

/// 将值转换为标签声明的数据类型
pub fn coerce_value(value: &TagValue, data_type: DataType) -> Option<TagValue> {
    if value.data_type() == data_type {
        return Some(value.clone());
    }
    match data_type {
        DataType::Bool => value.as_f64().map(|v| TagValue::Bool(v != 0.0)),
        DataType::String => Some(TagValue::String(value.to_string())),
        _ => value
            .as_f64()
            .and_then(|v| TagValue::from_f64(data_type, v)),
    }
}

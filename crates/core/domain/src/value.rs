//! 标签数据类型与标签值。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 标签的标量数据类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
}

impl DataType {
    /// 是否为数值类型（可参与量程转换）。
    pub fn is_number(self) -> bool {
        !matches!(self, DataType::Bool | DataType::String)
    }

    /// 类型占用字节数，字符串返回 0。
    pub fn size(self) -> usize {
        match self {
            DataType::Bool | DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
            DataType::String => 0,
        }
    }
}

/// 标签值，与 [`DataType`] 一一对应。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl TagValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TagValue::Bool(_) => DataType::Bool,
            TagValue::I8(_) => DataType::I8,
            TagValue::U8(_) => DataType::U8,
            TagValue::I16(_) => DataType::I16,
            TagValue::U16(_) => DataType::U16,
            TagValue::I32(_) => DataType::I32,
            TagValue::U32(_) => DataType::U32,
            TagValue::I64(_) => DataType::I64,
            TagValue::U64(_) => DataType::U64,
            TagValue::F32(_) => DataType::F32,
            TagValue::F64(_) => DataType::F64,
            TagValue::String(_) => DataType::String,
        }
    }

    /// 数值读数；布尔值按 1/0 处理，字符串没有数值读数。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            TagValue::I8(v) => Some(*v as f64),
            TagValue::U8(v) => Some(*v as f64),
            TagValue::I16(v) => Some(*v as f64),
            TagValue::U16(v) => Some(*v as f64),
            TagValue::I32(v) => Some(*v as f64),
            TagValue::U32(v) => Some(*v as f64),
            TagValue::I64(v) => Some(*v as f64),
            TagValue::U64(v) => Some(*v as f64),
            TagValue::F32(v) => Some(*v as f64),
            TagValue::F64(v) => Some(*v),
            TagValue::String(_) => None,
        }
    }

    /// 将浮点数按目标类型构造标签值。
    ///
    /// 整数类型向零截断并在越界时饱和；非数值类型返回 `None`。
    pub fn from_f64(data_type: DataType, value: f64) -> Option<Self> {
        let value = match data_type {
            DataType::I8 => TagValue::I8(value as i8),
            DataType::U8 => TagValue::U8(value as u8),
            DataType::I16 => TagValue::I16(value as i16),
            DataType::U16 => TagValue::U16(value as u16),
            DataType::I32 => TagValue::I32(value as i32),
            DataType::U32 => TagValue::U32(value as u32),
            DataType::I64 => TagValue::I64(value as i64),
            DataType::U64 => TagValue::U64(value as u64),
            DataType::F32 => TagValue::F32(value as f32),
            DataType::F64 => TagValue::F64(value),
            DataType::Bool | DataType::String => return None,
        };
        Some(value)
    }

    /// 类型的零值。
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => TagValue::Bool(false),
            DataType::String => TagValue::String(String::new()),
            other => TagValue::from_f64(other, 0.0).unwrap_or(TagValue::F64(0.0)),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{}", v),
            TagValue::I8(v) => write!(f, "{}", v),
            TagValue::U8(v) => write!(f, "{}", v),
            TagValue::I16(v) => write!(f, "{}", v),
            TagValue::U16(v) => write!(f, "{}", v),
            TagValue::I32(v) => write!(f, "{}", v),
            TagValue::U32(v) => write!(f, "{}", v),
            TagValue::I64(v) => write!(f, "{}", v),
            TagValue::U64(v) => write!(f, "{}", v),
            TagValue::F32(v) => write!(f, "{}", v),
            TagValue::F64(v) => write!(f, "{}", v),
            TagValue::String(v) => write!(f, "{}", v),
        }
    }
}

//! 标签（点位）定义。

use crate::value::{DataType, TagValue};
use serde::{Deserialize, Serialize};

/// 标签类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagKind {
    /// 通过驱动读写设备
    Io,
    /// 仅存在于缓存
    Mem,
    /// 持久化配置值，不经过设备
    Cfg,
}

/// 读写模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    #[serde(rename = "RO")]
    ReadOnly,
    #[serde(rename = "RW")]
    ReadWrite,
}

/// 量程转换参数。
///
/// 读方向：`out = (in - raw_lo) / (raw_hi - raw_lo) * (eng_hi - eng_lo) + eng_lo`，
/// 写方向取逆。任一跨度为 0 时不转换。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    /// 原始量程下限
    pub raw_lo: f64,
    /// 原始量程上限
    pub raw_hi: f64,
    /// 工程量下限
    pub eng_lo: f64,
    /// 工程量上限
    pub eng_hi: f64,
    /// 转换后的数据类型，缺省沿用原始类型
    #[serde(default)]
    pub eng_type: Option<DataType>,
}

impl Conversion {
    pub fn new(raw_lo: f64, raw_hi: f64, eng_lo: f64, eng_hi: f64) -> Self {
        Self {
            raw_lo,
            raw_hi,
            eng_lo,
            eng_hi,
            eng_type: None,
        }
    }

    pub fn with_eng_type(mut self, eng_type: DataType) -> Self {
        self.eng_type = Some(eng_type);
        self
    }

    /// 两个跨度均非零时才生效。
    pub fn is_active(&self) -> bool {
        self.raw_hi - self.raw_lo != 0.0 && self.eng_hi - self.eng_lo != 0.0
    }
}

/// 绑定在某个 slot 下的数据点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub slot_id: String,
    #[serde(default)]
    pub name: String,
    pub kind: TagKind,
    pub data_type: DataType,
    pub access: AccessMode,
    /// 驱动相关的寄存器/路径
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conversion: Option<Conversion>,
    /// 显示格式，如 `.2f`
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub value: Option<TagValue>,
}

pub(crate) fn default_enabled() -> bool {
    true
}

impl Tag {
    /// 构造一个启用、无转换、无值的标签。
    pub fn new(
        id: impl Into<String>,
        slot_id: impl Into<String>,
        kind: TagKind,
        data_type: DataType,
        access: AccessMode,
        address: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            slot_id: slot_id.into(),
            kind,
            data_type,
            access,
            address: address.into(),
            enabled: true,
            conversion: None,
            format: None,
            value: None,
        }
    }

    pub fn with_value(mut self, value: TagValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = Some(conversion);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn is_io(&self) -> bool {
        self.kind == TagKind::Io
    }

    pub fn is_writable(&self) -> bool {
        self.access == AccessMode::ReadWrite
    }

    /// 对外呈现的数据类型：启用量程转换的数值标签取转换后类型。
    pub fn engineering_type(&self) -> DataType {
        match &self.conversion {
            Some(conversion) if self.data_type.is_number() => {
                conversion.eng_type.unwrap_or(self.data_type)
            }
            _ => self.data_type,
        }
    }

    /// 对外类型的零值。
    pub fn default_value(&self) -> TagValue {
        TagValue::default_for(self.engineering_type())
    }
}

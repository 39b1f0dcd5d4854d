//! 采集领域模型：槽位（Slot）、标签（Tag）与标签值。

pub mod slot;
pub mod tag;
pub mod value;

pub use slot::{LinkStatus, Slot};
pub use tag::{AccessMode, Conversion, Tag, TagKind};
pub use value::{DataType, TagValue};

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

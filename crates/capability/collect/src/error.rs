//! 采集引擎错误类型

use ems_protocol::ProtocolError;
use ems_storage::StorageError;
use std::fmt;

/// 采集引擎错误。
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("tags span multiple slots: {0} and {1}")]
    MixedSlots(String, String),
    #[error("tag is read-only: {0}")]
    ReadOnlyTag(String),
    #[error("tag value is empty: {0}")]
    EmptyValue(String),
    #[error("slot not found: {0}")]
    SlotNotFound(String),
    #[error("slot disabled: {0}")]
    SlotDisabled(String),
    #[error("slot not connected: {0}")]
    NotConnected(String),
    #[error("registry error: {0}")]
    Registry(#[from] StorageError),
    #[error("cache error: {0}")]
    Cache(StorageError),
    #[error("driver not registered: {0}")]
    DriverNotRegistered(String),
    #[error("connect failed: {0}")]
    Connect(#[from] ProtocolError),
}

/// 连接结束原因（第一个上报者胜出）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireExit {
    /// 显式关闭（reset / shutdown）
    Closed,
    /// 超过保活时长无成功读写
    IdleTimeout,
    ReadFailed(String),
    WriteFailed(String),
    /// 角色任务 panic
    RolePanicked(&'static str),
}

impl fmt::Display for WireExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireExit::Closed => write!(f, "closed"),
            WireExit::IdleTimeout => write!(f, "idle timeout"),
            WireExit::ReadFailed(err) => write!(f, "read failed: {}", err),
            WireExit::WriteFailed(err) => write!(f, "write failed: {}", err),
            WireExit::RolePanicked(role) => write!(f, "{} panicked", role),
        }
    }
}

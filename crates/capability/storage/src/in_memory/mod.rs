//! 内存存储实现模块
//!
//! 用于本地演示、冒烟运行和测试。
//!
//! 包含以下实现：
//! - SlotRegistry: InMemorySlotRegistry

pub mod registry;

pub use registry::*;

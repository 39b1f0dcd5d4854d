//! # EMS Storage 模块
//!
//! 采集引擎依赖的两类存储：
//!
//! 1. **注册中心** (`traits.rs` / `in_memory/`)：槽位与标签元数据，连接状态回写
//! 2. **值缓存** (`cache.rs`)：标签 id -> 最近一次读到或写入的值
//!
//! ## 模块说明
//!
//! - [`traits`]：`SlotRegistry` 接口定义
//! - [`in_memory`]：`RwLock<HashMap>` 实现，支持从 JSON 种子加载
//! - [`cache`]：`ValueCache` 及变更队列 `tick()`
//! - [`error`]：存储错误类型定义
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use ems_storage::{InMemorySlotRegistry, SlotRegistry, ValueCache};
//!
//! let registry = InMemorySlotRegistry::from_json(&seed)?;
//! let slots = registry.list_enabled_slots().await?;
//!
//! let cache = ValueCache::new();
//! cache.set("temp", TagValue::F32(21.5));
//! ```

pub mod cache;
pub mod error;
pub mod in_memory;
pub mod traits;

pub use cache::*;
pub use error::*;
pub use traits::*;

pub use in_memory::InMemorySlotRegistry;

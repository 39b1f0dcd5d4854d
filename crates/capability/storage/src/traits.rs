//! 存储接口 Trait 定义
//!
//! 采集引擎只通过 [`SlotRegistry`] 读取槽位/标签元数据并回写连接状态，
//! 元数据的持久化由注册中心自行负责。
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{Slot, Tag};

/// 槽位与标签注册中心接口
#[async_trait]
pub trait SlotRegistry: Send + Sync {
    /// 列出所有已启用的槽位
    async fn list_enabled_slots(&self) -> Result<Vec<Slot>, StorageError>;

    /// 列出槽位下已启用的 IO 标签
    async fn list_io_tags(&self, slot_id: &str) -> Result<Vec<Tag>, StorageError>;

    /// 查找指定槽位
    async fn get_slot(&self, slot_id: &str) -> Result<Option<Slot>, StorageError>;

    /// 标记槽位在线
    async fn mark_online(&self, slot_id: &str) -> Result<(), StorageError>;

    /// 标记槽位离线
    async fn mark_offline(&self, slot_id: &str) -> Result<(), StorageError>;

    /// 将所有在线槽位（可按驱动过滤）置为离线，返回受影响数量
    async fn reset_links(&self, driver: Option<&str>) -> Result<usize, StorageError>;
}

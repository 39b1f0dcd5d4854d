//! 标签值缓存
//!
//! 采集引擎在每次读成功、写成功后覆盖写入；引擎自身从不删除条目。
//! `tick()` 返回并清空自上次调用以来变化过的条目，供上送模块消费。

use crate::error::StorageError;
use domain::{TagValue, now_epoch_ms};
use std::collections::HashMap;
use std::sync::RwLock;

/// 缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: TagValue,
    pub updated_at_ms: i64,
}

/// 线程安全的标签值缓存
pub struct ValueCache {
    values: RwLock<HashMap<String, CachedValue>>,
    changed: RwLock<HashMap<String, CachedValue>>,
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueCache {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            changed: RwLock::new(HashMap::new()),
        }
    }

    /// 覆盖写入
    pub fn set(&self, tag_id: &str, value: TagValue) -> Result<(), StorageError> {
        let entry = CachedValue {
            value,
            updated_at_ms: now_epoch_ms(),
        };
        self.values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .insert(tag_id.to_string(), entry.clone());
        self.changed
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .insert(tag_id.to_string(), entry);
        Ok(())
    }

    pub fn get(&self, tag_id: &str) -> Result<Option<CachedValue>, StorageError> {
        let values = self
            .values
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(values.get(tag_id).cloned())
    }

    /// 删除条目（由注册中心驱动，采集引擎不调用）
    pub fn delete(&self, tag_id: &str) -> Result<Option<CachedValue>, StorageError> {
        let removed = self
            .values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .remove(tag_id);
        self.changed
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .remove(tag_id);
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .clear();
        self.changed
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .clear();
        Ok(())
    }

    /// 取出并清空变更集合
    pub fn tick(&self) -> Result<HashMap<String, CachedValue>, StorageError> {
        let mut changed = self
            .changed
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(std::mem::take(&mut *changed))
    }
}

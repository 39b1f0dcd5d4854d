//! 槽位/标签注册中心内存实现

use crate::error::StorageError;
use crate::traits::SlotRegistry;
use domain::{LinkStatus, Slot, Tag};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// JSON 种子格式：`{"slots": [...], "tags": [...]}`
#[derive(Debug, Default, Deserialize)]
struct RegistrySeed {
    #[serde(default)]
    slots: Vec<Slot>,
    #[serde(default)]
    tags: Vec<Tag>,
}

/// 注册中心内存存储
pub struct InMemorySlotRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    tags: RwLock<HashMap<String, Tag>>,
}

impl Default for InMemorySlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySlotRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            tags: RwLock::new(HashMap::new()),
        }
    }

    /// 从 JSON 种子创建；标签引用的槽位必须存在。
    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        let seed: RegistrySeed = serde_json::from_str(raw)?;
        let registry = Self::new();
        for slot in seed.slots {
            registry.upsert_slot(slot)?;
        }
        for tag in seed.tags {
            registry.upsert_tag(tag)?;
        }
        Ok(registry)
    }

    pub fn upsert_slot(&self, slot: Slot) -> Result<(), StorageError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        slots.insert(slot.id.clone(), slot);
        Ok(())
    }

    pub fn upsert_tag(&self, tag: Tag) -> Result<(), StorageError> {
        {
            let slots = self
                .slots
                .read()
                .map_err(|_| StorageError::new("lock failed"))?;
            if !slots.contains_key(&tag.slot_id) {
                return Err(StorageError::new("slot not found"));
            }
        }
        let mut tags = self
            .tags
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        tags.insert(tag.id.clone(), tag);
        Ok(())
    }

    /// 删除槽位及其全部标签，返回槽位是否存在。
    pub fn remove_slot(&self, slot_id: &str) -> Result<bool, StorageError> {
        let removed = self
            .slots
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .remove(slot_id)
            .is_some();
        let mut tags = self
            .tags
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        tags.retain(|_, tag| tag.slot_id != slot_id);
        Ok(removed)
    }

    pub fn set_slot_enabled(&self, slot_id: &str, enabled: bool) -> Result<(), StorageError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let slot = slots
            .get_mut(slot_id)
            .ok_or_else(|| StorageError::new("slot not found"))?;
        slot.enabled = enabled;
        Ok(())
    }

    /// 槽位下全部标签（含 MEM/CFG 与禁用标签），按 id 排序。
    pub fn list_tags(&self, slot_id: &str) -> Result<Vec<Tag>, StorageError> {
        let tags = self
            .tags
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<Tag> = tags
            .values()
            .filter(|tag| tag.slot_id == slot_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    pub fn get_tag(&self, tag_id: &str) -> Result<Option<Tag>, StorageError> {
        let tags = self
            .tags
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(tags.get(tag_id).cloned())
    }

    fn set_link(&self, slot_id: &str, link: LinkStatus) -> Result<(), StorageError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let slot = slots
            .get_mut(slot_id)
            .ok_or_else(|| StorageError::new("slot not found"))?;
        if slot.link != link {
            debug!(target: "ems.storage", slot_id = %slot_id, link = ?link, "slot_link_changed");
        }
        slot.link = link;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SlotRegistry for InMemorySlotRegistry {
    async fn list_enabled_slots(&self) -> Result<Vec<Slot>, StorageError> {
        let slots = self
            .slots
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<Slot> = slots.values().filter(|slot| slot.enabled).cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn list_io_tags(&self, slot_id: &str) -> Result<Vec<Tag>, StorageError> {
        let tags = self
            .tags
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<Tag> = tags
            .values()
            .filter(|tag| tag.slot_id == slot_id && tag.enabled && tag.is_io())
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn get_slot(&self, slot_id: &str) -> Result<Option<Slot>, StorageError> {
        let slots = self
            .slots
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(slots.get(slot_id).cloned())
    }

    async fn mark_online(&self, slot_id: &str) -> Result<(), StorageError> {
        self.set_link(slot_id, LinkStatus::Online)
    }

    async fn mark_offline(&self, slot_id: &str) -> Result<(), StorageError> {
        self.set_link(slot_id, LinkStatus::Offline)
    }

    async fn reset_links(&self, driver: Option<&str>) -> Result<usize, StorageError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut count = 0;
        for slot in slots.values_mut() {
            if !slot.is_online() {
                continue;
            }
            if driver.is_some_and(|name| name != slot.driver) {
                continue;
            }
            slot.link = LinkStatus::Offline;
            count += 1;
        }
        Ok(count)
    }
}

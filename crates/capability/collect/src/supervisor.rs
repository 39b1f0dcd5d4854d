//! 连接池与对账循环
//!
//! 池中每个槽位最多一个条目：`Connecting`（连接中的预留）或 `Live`（运行中的 Wire）。
//! 预留在池锁内获取，并发对账不会为同一槽位建立两条连接。

use crate::error::{CollectError, WireExit};
use crate::wire::{WireHandle, WireParts, WireSettings, spawn_wire};
use crate::CollectOptions;
use domain::{Slot, Tag};
use ems_normalize::ValueConverter;
use ems_protocol::{Driver, DriverRegistry};
use ems_storage::{SlotRegistry, ValueCache};
use ems_telemetry::{record_connect_failure, record_connect_success, record_reconcile_pass};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum PoolEntry {
    Connecting(u64),
    Live(WireHandle),
}

impl PoolEntry {
    fn wire_id(&self) -> u64 {
        match self {
            PoolEntry::Connecting(id) => *id,
            PoolEntry::Live(handle) => handle.wire_id(),
        }
    }
}

struct SupervisorInner {
    registry: Arc<dyn SlotRegistry>,
    drivers: Arc<DriverRegistry>,
    cache: Arc<ValueCache>,
    converter: Arc<dyn ValueConverter>,
    options: CollectOptions,
    pool: Mutex<HashMap<String, PoolEntry>>,
    next_wire_id: AtomicU64,
    shutdown: CancellationToken,
}

impl SupervisorInner {
    fn lock_pool(&self) -> MutexGuard<'_, HashMap<String, PoolEntry>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 连接池（Supervisor）入口。
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<dyn SlotRegistry>,
        drivers: Arc<DriverRegistry>,
        cache: Arc<ValueCache>,
        converter: Arc<dyn ValueConverter>,
        options: CollectOptions,
    ) -> Self {
        let inner = SupervisorInner {
            registry,
            drivers,
            cache,
            converter,
            options: options.sanitized(),
            pool: Mutex::new(HashMap::new()),
            next_wire_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 清理残留在线标记后启动周期对账，直到 `shutdown`。
    pub fn start(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let inner = &supervisor.inner;
            match inner.registry.reset_links(None).await {
                Ok(count) => info!(target: "ems.collect", reset = count, "slot_links_reset"),
                Err(err) => warn!(target: "ems.collect", error = %err, "slot_links_reset_failed"),
            }
            let mut ticker = interval(inner.options.reconcile_interval);
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = supervisor.reconcile().await {
                    warn!(target: "ems.collect", error = %err, "reconcile_failed");
                }
            }
            info!(target: "ems.collect", "reconcile_loop_stopped");
        })
    }

    /// 单次对账：并发为每个已启用且未连接的槽位建立连接，全部结束后返回。
    /// 单个槽位失败或连接缓慢不影响其他槽位。
    pub async fn reconcile(&self) -> Result<(), CollectError> {
        record_reconcile_pass();
        let slots = self.inner.registry.list_enabled_slots().await?;
        // 任务独立于本次调用，调用方取消时预留仍会被正常释放
        let mut connects = Vec::with_capacity(slots.len());
        for slot in slots {
            let supervisor = self.clone();
            connects.push(tokio::spawn(async move {
                if let Err(err) = supervisor.connect_slot(&slot).await {
                    record_connect_failure();
                    warn!(
                        target: "ems.collect",
                        slot_id = %slot.id,
                        driver = %slot.driver,
                        error = %err,
                        "slot_connect_failed"
                    );
                }
            }));
        }
        for connect in connects {
            if let Err(err) = connect.await {
                warn!(target: "ems.collect", error = %err, "slot_connect_task_failed");
            }
        }
        Ok(())
    }

    /// 关闭槽位的连接并标记离线；无连接时什么也不做。
    pub async fn reset(&self, slot_id: &str) {
        let entry = self.inner.lock_pool().remove(slot_id);
        match entry {
            Some(PoolEntry::Live(handle)) => {
                handle.close();
                info!(target: "ems.collect", slot_id = %slot_id, wire_id = handle.wire_id(), "slot_reset");
                self.mark_offline(slot_id).await;
            }
            Some(PoolEntry::Connecting(wire_id)) => {
                info!(target: "ems.collect", slot_id = %slot_id, wire_id, "slot_reset_while_connecting");
            }
            None => {}
        }
    }

    /// 写入一批同槽位标签。非 IO 标签直接写缓存，IO 标签交给连接的写队列。
    pub async fn write(&self, tags: Vec<Tag>) -> Result<(), CollectError> {
        let Some(first) = tags.first() else {
            return Ok(());
        };
        let slot_id = first.slot_id.clone();
        for tag in &tags {
            if tag.slot_id != slot_id {
                return Err(CollectError::MixedSlots(slot_id, tag.slot_id.clone()));
            }
            if !tag.is_writable() {
                return Err(CollectError::ReadOnlyTag(tag.id.clone()));
            }
            if tag.value.is_none() {
                return Err(CollectError::EmptyValue(tag.id.clone()));
            }
        }

        let slot = self
            .inner
            .registry
            .get_slot(&slot_id)
            .await?
            .ok_or_else(|| CollectError::SlotNotFound(slot_id.clone()))?;
        if !slot.enabled {
            return Err(CollectError::SlotDisabled(slot_id));
        }

        let (io, local): (Vec<Tag>, Vec<Tag>) = tags.into_iter().partition(Tag::is_io);
        let handle = if io.is_empty() {
            None
        } else {
            Some(
                self.live_handle(&slot_id)
                    .ok_or_else(|| CollectError::NotConnected(slot_id.clone()))?,
            )
        };

        for tag in local {
            if let Some(value) = tag.value {
                self.inner
                    .cache
                    .set(&tag.id, value)
                    .map_err(CollectError::Cache)?;
            }
        }
        if let Some(handle) = handle {
            let count = io.len();
            if handle.send(io).await {
                debug!(target: "ems.collect", slot_id = %slot_id, count, "write_batch_queued");
            }
        }
        Ok(())
    }

    /// 停止对账，关闭全部连接并等待拆除完成。
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<WireHandle> = self
            .inner
            .lock_pool()
            .drain()
            .filter_map(|(_, entry)| match entry {
                PoolEntry::Live(handle) => Some(handle),
                PoolEntry::Connecting(_) => None,
            })
            .collect();
        for handle in &handles {
            handle.close();
        }
        for handle in &handles {
            handle.closed().await;
            self.mark_offline(handle.slot_id()).await;
        }
        info!(target: "ems.collect", closed = handles.len(), "supervisor_stopped");
    }

    /// 当前有运行中连接的槽位（排序）。
    pub fn connected_slots(&self) -> Vec<String> {
        let pool = self.inner.lock_pool();
        let mut slots: Vec<String> = pool
            .iter()
            .filter(|(_, entry)| matches!(entry, PoolEntry::Live(_)))
            .map(|(slot_id, _)| slot_id.clone())
            .collect();
        slots.sort();
        slots
    }

    pub fn is_connected(&self, slot_id: &str) -> bool {
        matches!(self.inner.lock_pool().get(slot_id), Some(PoolEntry::Live(_)))
    }

    fn live_handle(&self, slot_id: &str) -> Option<WireHandle> {
        match self.inner.lock_pool().get(slot_id) {
            Some(PoolEntry::Live(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// 在池锁内为槽位预留连接编号；已有条目或正在停止时返回 None。
    fn reserve(&self, slot_id: &str) -> Option<u64> {
        if self.inner.shutdown.is_cancelled() {
            return None;
        }
        let mut pool = self.inner.lock_pool();
        if pool.contains_key(slot_id) {
            return None;
        }
        let wire_id = self.inner.next_wire_id.fetch_add(1, Ordering::Relaxed);
        pool.insert(slot_id.to_string(), PoolEntry::Connecting(wire_id));
        Some(wire_id)
    }

    /// 释放仍属于本次连接的预留。
    fn release(&self, slot_id: &str, wire_id: u64) {
        let mut pool = self.inner.lock_pool();
        if pool.get(slot_id).is_some_and(|entry| entry.wire_id() == wire_id) {
            pool.remove(slot_id);
        }
    }

    async fn connect_slot(&self, slot: &Slot) -> Result<(), CollectError> {
        let Some(wire_id) = self.reserve(&slot.id) else {
            return Ok(());
        };
        let result = self.open_wire(slot, wire_id).await;
        if result.is_err() {
            self.release(&slot.id, wire_id);
        }
        result
    }

    async fn open_wire(&self, slot: &Slot, wire_id: u64) -> Result<(), CollectError> {
        let inner = &self.inner;
        let factory = inner
            .drivers
            .get(&slot.driver)
            .ok_or_else(|| CollectError::DriverNotRegistered(slot.driver.clone()))?;
        let mut driver = factory.connect(&slot.params).await?;
        record_connect_success();

        let tags = match inner.registry.list_io_tags(&slot.id).await {
            Ok(tags) => tags,
            Err(err) => {
                close_quietly(&slot.id, driver.as_mut()).await;
                return Err(err.into());
            }
        };

        let settings = wire_settings(slot, &inner.options, !tags.is_empty());
        let installed: Result<JoinHandle<WireExit>, Box<dyn Driver>> = {
            let mut pool = inner.lock_pool();
            let reserved = pool
                .get(&slot.id)
                .is_some_and(|entry| matches!(entry, PoolEntry::Connecting(id) if *id == wire_id));
            if reserved && !inner.shutdown.is_cancelled() {
                let (handle, run) = spawn_wire(WireParts {
                    slot_id: slot.id.clone(),
                    wire_id,
                    driver,
                    tags,
                    cache: Arc::clone(&inner.cache),
                    converter: Arc::clone(&inner.converter),
                    settings,
                });
                pool.insert(slot.id.clone(), PoolEntry::Live(handle));
                Ok(run)
            } else {
                Err(driver)
            }
        };

        let run = match installed {
            Ok(run) => run,
            Err(mut driver) => {
                // 连接期间槽位被 reset 或引擎停止
                info!(target: "ems.collect", slot_id = %slot.id, wire_id, "connect_discarded");
                close_quietly(&slot.id, driver.as_mut()).await;
                return Ok(());
            }
        };

        if let Err(err) = inner.registry.mark_online(&slot.id).await {
            warn!(target: "ems.collect", slot_id = %slot.id, error = %err, "mark_online_failed");
        }
        if !self.is_live(&slot.id, wire_id) {
            self.mark_offline(&slot.id).await;
        }
        info!(target: "ems.collect", slot_id = %slot.id, driver = %slot.driver, wire_id, "slot_connected");
        self.spawn_reaper(slot.id.clone(), wire_id, run);
        Ok(())
    }

    fn is_live(&self, slot_id: &str, wire_id: u64) -> bool {
        matches!(
            self.inner.lock_pool().get(slot_id),
            Some(PoolEntry::Live(handle)) if handle.wire_id() == wire_id
        )
    }

    /// Wire 拆除后移出连接池并标记离线；已被后继连接替换时不动。
    fn spawn_reaper(&self, slot_id: String, wire_id: u64, run: JoinHandle<WireExit>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let exit = match run.await {
                Ok(exit) => exit,
                Err(_) => WireExit::RolePanicked("wire"),
            };
            let removed = {
                let mut pool = supervisor.inner.lock_pool();
                let current = matches!(
                    pool.get(&slot_id),
                    Some(PoolEntry::Live(handle)) if handle.wire_id() == wire_id
                );
                if current {
                    pool.remove(&slot_id);
                }
                current
            };
            if removed {
                supervisor.mark_offline(&slot_id).await;
            }
            info!(target: "ems.collect", slot_id = %slot_id, wire_id, reason = %exit, removed, "wire_reaped");
        });
    }

    async fn mark_offline(&self, slot_id: &str) {
        if let Err(err) = self.inner.registry.mark_offline(slot_id).await {
            warn!(target: "ems.collect", slot_id = %slot_id, error = %err, "mark_offline_failed");
        }
    }
}

/// 合成单连接参数。有 IO 标签时保活不短于两个轮询周期加一个检查周期，
/// 否则轮询中的连接会在首次读取前被判定空闲。
fn wire_settings(slot: &Slot, options: &CollectOptions, polling: bool) -> WireSettings {
    let poll_interval = slot
        .poll_interval_or(options.read_interval)
        .max(Duration::from_millis(1));
    let mut keepalive = slot.keepalive_or(options.keepalive);
    if polling {
        let floor = poll_interval * 2 + options.idle_check_interval;
        if keepalive < floor {
            warn!(
                target: "ems.collect",
                slot_id = %slot.id,
                keepalive_ms = keepalive.as_millis() as u64,
                floor_ms = floor.as_millis() as u64,
                "keepalive_raised"
            );
            keepalive = floor;
        }
    }
    WireSettings {
        poll_interval,
        keepalive,
        idle_check_interval: options.idle_check_interval,
        write_queue: options.write_queue,
    }
}

async fn close_quietly(slot_id: &str, driver: &mut dyn Driver) {
    if let Err(err) = driver.close().await {
        warn!(target: "ems.collect", slot_id = %slot_id, error = %err, "driver_close_failed");
    }
}

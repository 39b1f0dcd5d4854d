#![allow(dead_code)]

use async_trait::async_trait;
use domain::{AccessMode, DataType, Slot, Tag, TagKind, TagValue};
use ems_collect::{CollectOptions, Supervisor};
use ems_normalize::LinearConverter;
use ems_protocol::{Driver, DriverFactory, DriverRegistry, ProtocolError};
use ems_storage::{InMemorySlotRegistry, ValueCache};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FAKE: &str = "FAKE";

/// 脚本化驱动：记录调用、按需失败、检测并发 I/O。
///
/// 每个驱动实例以连接参数区分槽位（Harness 中参数即槽位 id）。
#[derive(Default)]
pub struct Script {
    pub connects: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
    writes: Mutex<Vec<(String, Vec<Tag>)>>,
    reads_by: Mutex<HashMap<String, usize>>,
    failing_reads: Mutex<HashSet<String>>,
    pub fail_connect: AtomicBool,
    pub fail_read: AtomicBool,
    pub fail_write: AtomicBool,
    pub panic_read: AtomicBool,
    pub connect_delay_ms: AtomicUsize,
    pub io_delay_ms: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub read_value: Mutex<Option<TagValue>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn written(&self) -> Vec<Vec<Tag>> {
        let writes = self.writes.lock().expect("writes");
        writes.iter().map(|(_, batch)| batch.clone()).collect()
    }

    pub fn written_by(&self, params: &str) -> Vec<Vec<Tag>> {
        let writes = self.writes.lock().expect("writes");
        writes
            .iter()
            .filter(|(owner, _)| owner == params)
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    pub fn reads_by(&self, params: &str) -> usize {
        let reads = self.reads_by.lock().expect("reads");
        reads.get(params).copied().unwrap_or(0)
    }

    /// 只让指定参数的驱动读失败
    pub fn fail_reads_for(&self, params: &str) {
        self.failing_reads
            .lock()
            .expect("failing reads")
            .insert(params.to_string());
    }

    fn read_fails(&self, params: &str) -> bool {
        self.fail_read.load(Ordering::SeqCst)
            || self.failing_reads.lock().expect("failing reads").contains(params)
    }

    pub fn set_read_value(&self, value: TagValue) {
        *self.read_value.lock().expect("read value") = Some(value);
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    async fn io_delay(&self) {
        let delay = self.io_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

pub struct FakeFactory {
    pub script: Arc<Script>,
}

#[async_trait]
impl DriverFactory for FakeFactory {
    fn name(&self) -> &str {
        FAKE
    }

    async fn connect(&self, params: &str) -> Result<Box<dyn Driver>, ProtocolError> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.connect_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connection("refused".to_string()));
        }
        Ok(Box::new(FakeDriver {
            params: params.to_string(),
            script: Arc::clone(&self.script),
        }))
    }
}

pub struct FakeDriver {
    params: String,
    script: Arc<Script>,
}

#[async_trait]
impl Driver for FakeDriver {
    fn name(&self) -> &str {
        FAKE
    }

    async fn read(&mut self, tags: &mut [Tag]) -> Result<(), ProtocolError> {
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        *self
            .script
            .reads_by
            .lock()
            .expect("reads")
            .entry(self.params.clone())
            .or_default() += 1;
        if self.script.panic_read.load(Ordering::SeqCst) {
            panic!("scripted read panic");
        }
        self.script.enter();
        self.script.io_delay().await;
        self.script.leave();
        if self.script.read_fails(&self.params) {
            return Err(ProtocolError::Connection("link down".to_string()));
        }
        let value = self.script.read_value.lock().expect("read value").clone();
        for tag in tags.iter_mut() {
            tag.value = Some(
                value
                    .clone()
                    .unwrap_or_else(|| TagValue::default_for(tag.data_type)),
            );
        }
        Ok(())
    }

    async fn write(&mut self, tags: &[Tag]) -> Result<(), ProtocolError> {
        self.script.enter();
        self.script.io_delay().await;
        self.script.leave();
        if self.script.fail_write.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connection("write rejected".to_string()));
        }
        self.script
            .writes
            .lock()
            .expect("writes")
            .push((self.params.clone(), tags.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn io_tag(id: &str, slot_id: &str) -> Tag {
    Tag::new(id, slot_id, TagKind::Io, DataType::F32, AccessMode::ReadWrite, "3:0")
}

pub fn options() -> CollectOptions {
    CollectOptions {
        read_interval: Duration::from_millis(500),
        keepalive: Duration::from_secs(5),
        reconcile_interval: Duration::from_secs(1),
        idle_check_interval: Duration::from_millis(500),
        write_queue: 10,
    }
}

pub struct Harness {
    pub registry: Arc<InMemorySlotRegistry>,
    pub cache: Arc<ValueCache>,
    pub script: Arc<Script>,
    pub supervisor: Supervisor,
}

impl Harness {
    pub fn new(slots: &[&str]) -> Self {
        Self::with_options(slots, options())
    }

    pub fn with_options(slots: &[&str], options: CollectOptions) -> Self {
        let registry = Arc::new(InMemorySlotRegistry::new());
        for slot in slots {
            registry
                .upsert_slot(Slot::new(*slot, FAKE, *slot))
                .expect("slot");
        }
        let script = Script::new();
        let mut drivers = DriverRegistry::new();
        drivers.register(Arc::new(FakeFactory {
            script: Arc::clone(&script),
        }));
        let cache = Arc::new(ValueCache::new());
        let supervisor = Supervisor::new(
            registry.clone(),
            Arc::new(drivers),
            Arc::clone(&cache),
            Arc::new(LinearConverter),
            options,
        );
        Self {
            registry,
            cache,
            script,
            supervisor,
        }
    }

    pub fn add_tag(&self, tag: Tag) {
        self.registry.upsert_tag(tag).expect("tag");
    }

    pub async fn is_online(&self, slot_id: &str) -> bool {
        use ems_storage::SlotRegistry;
        self.registry
            .get_slot(slot_id)
            .await
            .expect("get")
            .expect("slot")
            .is_online()
    }
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn fake_driver(script: &Arc<Script>) -> Box<dyn Driver> {
    Box::new(FakeDriver {
        params: String::new(),
        script: Arc::clone(script),
    })
}

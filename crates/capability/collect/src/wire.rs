//! 单连接执行体
//!
//! 状态：running -> closing -> closed。
//! 所有驱动调用经同一把 I/O 锁串行化；关闭信号由错误监视在关闭驱动后广播。

use crate::error::WireExit;
use domain::Tag;
use ems_normalize::ValueConverter;
use ems_protocol::Driver;
use ems_storage::ValueCache;
use ems_telemetry::{
    record_cache_writes, record_idle_timeout, record_read_failure, record_read_ok,
    record_send_dropped, record_wire_closed, record_wire_started, record_write_failure,
    record_write_ok,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// 单连接时间参数。
#[derive(Debug, Clone, Copy)]
pub struct WireSettings {
    pub poll_interval: Duration,
    pub keepalive: Duration,
    pub idle_check_interval: Duration,
    pub write_queue: usize,
}

/// 启动 Wire 所需的全部部件。
pub struct WireParts {
    pub slot_id: String,
    pub wire_id: u64,
    pub driver: Box<dyn Driver>,
    /// 已启用的 IO 标签
    pub tags: Vec<Tag>,
    pub cache: Arc<ValueCache>,
    pub converter: Arc<dyn ValueConverter>,
    pub settings: WireSettings,
}

struct WireShared {
    slot_id: String,
    settings: WireSettings,
    driver: Mutex<Box<dyn Driver>>,
    last_use: RwLock<Instant>,
    closing: CancellationToken,
    error_tx: mpsc::Sender<WireExit>,
    cache: Arc<ValueCache>,
    converter: Arc<dyn ValueConverter>,
}

impl WireShared {
    fn touch(&self) {
        *self
            .last_use
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_use
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// 锁存结束原因，已有原因时忽略。
    fn report(&self, reason: WireExit) {
        let _ = self.error_tx.try_send(reason);
    }

    fn store(&self, tags: &[Tag]) {
        let mut written = 0;
        for tag in tags {
            let Some(value) = tag.value.clone() else {
                continue;
            };
            match self.cache.set(&tag.id, value) {
                Ok(()) => written += 1,
                Err(err) => {
                    warn!(target: "ems.collect", tag_id = %tag.id, error = %err, "cache_write_failed")
                }
            }
        }
        record_cache_writes(written);
    }
}

/// Wire 的外部句柄，可克隆。
#[derive(Clone)]
pub struct WireHandle {
    slot_id: String,
    wire_id: u64,
    tx: mpsc::Sender<Vec<Tag>>,
    error_tx: mpsc::Sender<WireExit>,
    closing: CancellationToken,
    terminated: CancellationToken,
}

impl WireHandle {
    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    pub fn wire_id(&self) -> u64 {
        self.wire_id
    }

    /// 入队一批写请求。队列满时等待；连接关闭中直接丢弃并返回 false。
    pub async fn send(&self, batch: Vec<Tag>) -> bool {
        let sent = if self.closing.is_cancelled() {
            false
        } else {
            tokio::select! {
                biased;
                _ = self.closing.cancelled() => false,
                result = self.tx.send(batch) => result.is_ok(),
            }
        };
        if !sent {
            record_send_dropped();
            debug!(target: "ems.collect", slot_id = %self.slot_id, wire_id = self.wire_id, "write_batch_dropped");
        }
        sent
    }

    /// 请求关闭，不等待拆除完成。
    pub fn close(&self) {
        let _ = self.error_tx.try_send(WireExit::Closed);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// 等待四个角色全部退出。
    pub async fn closed(&self) {
        self.terminated.cancelled().await;
    }
}

/// 启动 Wire 的四个角色，返回句柄与整体运行任务（结束值为结束原因）。
pub fn spawn_wire(parts: WireParts) -> (WireHandle, JoinHandle<WireExit>) {
    let WireParts {
        slot_id,
        wire_id,
        driver,
        tags,
        cache,
        converter,
        settings,
    } = parts;

    let (tx, write_rx) = mpsc::channel(settings.write_queue.max(1));
    let (error_tx, error_rx) = mpsc::channel(1);
    let closing = CancellationToken::new();
    let terminated = CancellationToken::new();

    let shared = Arc::new(WireShared {
        slot_id: slot_id.clone(),
        settings,
        driver: Mutex::new(driver),
        last_use: RwLock::new(Instant::now()),
        closing: closing.clone(),
        error_tx: error_tx.clone(),
        cache,
        converter,
    });
    let handle = WireHandle {
        slot_id: slot_id.clone(),
        wire_id,
        tx,
        error_tx,
        closing,
        terminated: terminated.clone(),
    };

    let span = info_span!("wire", slot_id = %slot_id, wire_id);
    let run = tokio::spawn(
        run_wire(shared, tags, write_rx, error_rx, terminated).instrument(span),
    );
    (handle, run)
}

async fn run_wire(
    shared: Arc<WireShared>,
    tags: Vec<Tag>,
    write_rx: mpsc::Receiver<Vec<Tag>>,
    error_rx: mpsc::Receiver<WireExit>,
    terminated: CancellationToken,
) -> WireExit {
    record_wire_started();
    info!(target: "ems.collect", tag_count = tags.len(), "wire_started");

    let span = tracing::Span::current();
    let mut roles = JoinSet::new();
    let mut names = HashMap::new();
    let role = roles.spawn(read_loop(Arc::clone(&shared), tags).instrument(span.clone()));
    names.insert(role.id(), "read_loop");
    let role = roles.spawn(write_loop(Arc::clone(&shared), write_rx).instrument(span.clone()));
    names.insert(role.id(), "write_loop");
    let role = roles.spawn(idle_watch(Arc::clone(&shared)).instrument(span.clone()));
    names.insert(role.id(), "idle_watch");
    let role = roles.spawn(error_watch(Arc::clone(&shared), error_rx).instrument(span));
    names.insert(role.id(), "error_watch");

    let mut exit = None;
    let mut panicked = None;
    while let Some(joined) = roles.join_next().await {
        match joined {
            Ok(Some(reason)) => exit = Some(reason),
            Ok(None) => {}
            Err(err) => {
                let role = names.get(&err.id()).copied().unwrap_or("unknown");
                error!(target: "ems.collect", role, error = %err, "wire_role_panicked");
                panicked.get_or_insert(role);
                shared.report(WireExit::RolePanicked(role));
                shared.closing.cancel();
            }
        }
    }

    // 错误监视未正常结束时驱动尚未关闭
    let exit = match exit {
        Some(exit) => exit,
        None => {
            let mut driver = shared.driver.lock().await;
            if let Err(err) = driver.close().await {
                warn!(target: "ems.collect", error = %err, "driver_close_failed");
            }
            WireExit::RolePanicked(panicked.unwrap_or("unknown"))
        }
    };

    terminated.cancel();
    record_wire_closed();
    info!(target: "ems.collect", reason = %exit, "wire_closed");
    exit
}

/// 读循环：休眠一个轮询周期，读取、转换、写缓存。
async fn read_loop(shared: Arc<WireShared>, mut tags: Vec<Tag>) -> Option<WireExit> {
    if tags.is_empty() {
        // 没有 IO 标签时不轮询，只靠写请求保活
        shared.closing.cancelled().await;
        return None;
    }
    loop {
        tokio::select! {
            _ = shared.closing.cancelled() => return None,
            _ = sleep(shared.settings.poll_interval) => {}
        }

        for tag in tags.iter_mut() {
            tag.value = None;
        }
        let result = {
            let mut driver = shared.driver.lock().await;
            if shared.closing.is_cancelled() {
                return None;
            }
            driver.read(&mut tags).await
        };

        match result {
            Ok(()) => {
                shared.touch();
                record_read_ok();
                for tag in tags.iter_mut().filter(|tag| tag.value.is_some()) {
                    shared.converter.on_read(tag);
                }
                shared.store(&tags);
            }
            Err(err) => {
                record_read_failure();
                warn!(target: "ems.collect", slot_id = %shared.slot_id, error = %err, "wire_read_failed");
                shared.report(WireExit::ReadFailed(err.to_string()));
                return None;
            }
        }
    }
}

/// 写循环：按入队顺序逐批下发。
async fn write_loop(
    shared: Arc<WireShared>,
    mut write_rx: mpsc::Receiver<Vec<Tag>>,
) -> Option<WireExit> {
    loop {
        let batch = tokio::select! {
            _ = shared.closing.cancelled() => return None,
            batch = write_rx.recv() => batch?,
        };

        let mut raw = batch.clone();
        for tag in raw.iter_mut() {
            shared.converter.on_write(tag);
        }
        let result = {
            let mut driver = shared.driver.lock().await;
            if shared.closing.is_cancelled() {
                return None;
            }
            driver.write(&raw).await
        };

        match result {
            Ok(()) => {
                shared.touch();
                record_write_ok();
                shared.store(&batch);
            }
            Err(err) => {
                record_write_failure();
                warn!(target: "ems.collect", slot_id = %shared.slot_id, error = %err, "wire_write_failed");
                shared.report(WireExit::WriteFailed(err.to_string()));
                return None;
            }
        }
    }
}

/// 空闲监视：超过保活时长没有成功读写即上报。
async fn idle_watch(shared: Arc<WireShared>) -> Option<WireExit> {
    let period = shared.settings.idle_check_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shared.closing.cancelled() => return None,
            _ = ticker.tick() => {}
        }
        let idle = shared.idle_for();
        if idle > shared.settings.keepalive {
            record_idle_timeout();
            info!(target: "ems.collect", slot_id = %shared.slot_id, idle_ms = idle.as_millis() as u64, "wire_idle_timeout");
            shared.report(WireExit::IdleTimeout);
            return None;
        }
    }
}

/// 错误监视：取第一个结束原因，持 I/O 锁关闭驱动后广播关闭。
async fn error_watch(
    shared: Arc<WireShared>,
    mut error_rx: mpsc::Receiver<WireExit>,
) -> Option<WireExit> {
    let reason = error_rx.recv().await.unwrap_or(WireExit::Closed);
    let mut driver = shared.driver.lock().await;
    if let Err(err) = driver.close().await {
        warn!(target: "ems.collect", slot_id = %shared.slot_id, error = %err, "driver_close_failed");
    }
    shared.closing.cancel();
    Some(reason)
}

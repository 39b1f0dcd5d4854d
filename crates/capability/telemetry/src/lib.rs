//! 追踪初始化与采集指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 采集指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reconcile_passes: u64,
    pub connect_success: u64,
    pub connect_failure: u64,
    pub wires_started: u64,
    pub wires_closed: u64,
    pub idle_timeouts: u64,
    pub reads_ok: u64,
    pub read_failures: u64,
    pub writes_ok: u64,
    pub write_failures: u64,
    pub sends_dropped: u64,
    pub cache_writes: u64,
}

/// 采集指标（进程级计数器）。
#[derive(Default)]
pub struct CollectMetrics {
    reconcile_passes: AtomicU64,
    connect_success: AtomicU64,
    connect_failure: AtomicU64,
    wires_started: AtomicU64,
    wires_closed: AtomicU64,
    idle_timeouts: AtomicU64,
    reads_ok: AtomicU64,
    read_failures: AtomicU64,
    writes_ok: AtomicU64,
    write_failures: AtomicU64,
    sends_dropped: AtomicU64,
    cache_writes: AtomicU64,
}

impl CollectMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconcile_passes: self.reconcile_passes.load(Ordering::Relaxed),
            connect_success: self.connect_success.load(Ordering::Relaxed),
            connect_failure: self.connect_failure.load(Ordering::Relaxed),
            wires_started: self.wires_started.load(Ordering::Relaxed),
            wires_closed: self.wires_closed.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            sends_dropped: self.sends_dropped.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<CollectMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static CollectMetrics {
    METRICS.get_or_init(CollectMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录一次对账。
pub fn record_reconcile_pass() {
    metrics().reconcile_passes.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接成功次数。
pub fn record_connect_success() {
    metrics().connect_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接失败次数（含驱动未注册）。
pub fn record_connect_failure() {
    metrics().connect_failure.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wire_started() {
    metrics().wires_started.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wire_closed() {
    metrics().wires_closed.fetch_add(1, Ordering::Relaxed);
}

/// 记录空闲超时断开次数。
pub fn record_idle_timeout() {
    metrics().idle_timeouts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_read_ok() {
    metrics().reads_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_read_failure() {
    metrics().read_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_ok() {
    metrics().writes_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_failure() {
    metrics().write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接关闭中被丢弃的写批次。
pub fn record_send_dropped() {
    metrics().sends_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入值缓存的条目数。
pub fn record_cache_writes(count: u64) {
    metrics().cache_writes.fetch_add(count, Ordering::Relaxed);
}

//! 采集网关进程：加载注册表、启动连接池对账，Ctrl-C 后优雅停止。

use ems_collect::{CollectOptions, Supervisor};
use ems_config::AppConfig;
use ems_normalize::LinearConverter;
use ems_protocol::builtin_drivers;
use ems_storage::{InMemorySlotRegistry, ValueCache};
use ems_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 槽位/标签注册表：有种子文件时从文件加载
    let registry = Arc::new(load_registry(&config)?);
    let drivers = Arc::new(builtin_drivers());
    info!(target: "ems.gateway", drivers = ?drivers.names(), "drivers_registered");

    let cache = Arc::new(ValueCache::new());
    let supervisor = Supervisor::new(
        registry,
        drivers,
        Arc::clone(&cache),
        Arc::new(LinearConverter),
        collect_options(&config),
    );
    let reconcile = supervisor.start();
    let ticker = tokio::spawn(export_changes(
        Arc::clone(&cache),
        Duration::from_millis(config.cache_tick_ms.max(1)),
    ));

    tokio::signal::ctrl_c().await?;
    info!(target: "ems.gateway", "shutdown_requested");

    supervisor.shutdown().await;
    ticker.abort();
    if let Err(err) = reconcile.await {
        warn!(target: "ems.gateway", error = %err, "reconcile_task_failed");
    }
    info!(target: "ems.gateway", metrics = ?metrics().snapshot(), "gateway_stopped");
    Ok(())
}

fn load_registry(config: &AppConfig) -> Result<InMemorySlotRegistry, Box<dyn std::error::Error>> {
    let Some(path) = config.registry_file.as_deref() else {
        info!(target: "ems.gateway", "registry_empty");
        return Ok(InMemorySlotRegistry::new());
    };
    let raw = std::fs::read_to_string(path)?;
    let registry = InMemorySlotRegistry::from_json(&raw)?;
    info!(target: "ems.gateway", path = %path, "registry_loaded");
    Ok(registry)
}

fn collect_options(config: &AppConfig) -> CollectOptions {
    CollectOptions {
        read_interval: Duration::from_millis(config.read_interval_ms),
        keepalive: Duration::from_secs(config.keepalive_seconds),
        reconcile_interval: Duration::from_millis(config.reconcile_interval_ms),
        idle_check_interval: Duration::from_millis(config.idle_check_ms),
        write_queue: config.write_queue,
    }
}

/// 周期性取走变更值，供上游导出。
async fn export_changes(cache: Arc<ValueCache>, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match cache.tick() {
            Ok(changed) if changed.is_empty() => {}
            Ok(changed) => {
                info!(target: "ems.gateway", changed = changed.len(), cached = cache.len(), "cache_tick")
            }
            Err(err) => warn!(target: "ems.gateway", error = %err, "cache_tick_failed"),
        }
    }
}

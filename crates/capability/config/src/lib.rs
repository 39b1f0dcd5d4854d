//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// 默认轮询间隔（毫秒）
    pub read_interval_ms: u64,
    /// 默认空闲保活（秒）
    pub keepalive_seconds: u64,
    /// 连接池对账周期（毫秒）
    pub reconcile_interval_ms: u64,
    /// 空闲检查周期（毫秒）
    pub idle_check_ms: u64,
    /// 单连接写队列容量
    pub write_queue: usize,
    /// 变更值导出周期（毫秒）
    pub cache_tick_ms: u64,
    /// 注册中心种子文件
    pub registry_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            read_interval_ms: 1000,
            keepalive_seconds: 60,
            reconcile_interval_ms: 1000,
            idle_check_ms: 1000,
            write_queue: 10,
            cache_tick_ms: 5000,
            registry_file: None,
        }
    }
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let read_interval_ms =
            read_u64_with_default("EMS_COLLECT_READ_INTERVAL_MS", defaults.read_interval_ms)?;
        let keepalive_seconds =
            read_u64_with_default("EMS_COLLECT_KEEPALIVE_SECONDS", defaults.keepalive_seconds)?;
        let reconcile_interval_ms = read_u64_with_default(
            "EMS_COLLECT_RECONCILE_INTERVAL_MS",
            defaults.reconcile_interval_ms,
        )?;
        let idle_check_ms =
            read_u64_with_default("EMS_COLLECT_IDLE_CHECK_MS", defaults.idle_check_ms)?;
        let write_queue = read_usize_with_default("EMS_COLLECT_WRITE_QUEUE", defaults.write_queue)?;
        if write_queue == 0 {
            return Err(ConfigError::Invalid(
                "EMS_COLLECT_WRITE_QUEUE".to_string(),
                "0".to_string(),
            ));
        }
        let cache_tick_ms =
            read_u64_with_default("EMS_COLLECT_CACHE_TICK_MS", defaults.cache_tick_ms)?;
        let registry_file = read_optional("EMS_REGISTRY_FILE");

        Ok(Self {
            read_interval_ms,
            keepalive_seconds,
            reconcile_interval_ms,
            idle_check_ms,
            write_queue,
            cache_tick_ms,
            registry_file,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

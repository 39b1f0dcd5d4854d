//! 设备连接槽位定义。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 连接状态（由采集引擎回写，仅供观测）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Online,
    #[default]
    Offline,
}

/// 已配置的设备端点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// 驱动类型名，如 `MODBUS-TCP`
    pub driver: String,
    /// 驱动参数（对引擎不透明）
    #[serde(default)]
    pub params: String,
    /// 缺省启用，与 `Slot::new` 一致
    #[serde(default = "crate::tag::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub link: LinkStatus,
    /// 覆盖默认轮询间隔
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// 覆盖默认空闲保活时长
    #[serde(default)]
    pub keepalive_ms: Option<u64>,
}

impl Slot {
    pub fn new(
        id: impl Into<String>,
        driver: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            driver: driver.into(),
            params: params.into(),
            enabled: true,
            link: LinkStatus::Offline,
            poll_interval_ms: None,
            keepalive_ms: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.link == LinkStatus::Online
    }

    pub fn poll_interval_or(&self, default: Duration) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    pub fn keepalive_or(&self, default: Duration) -> Duration {
        self.keepalive_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

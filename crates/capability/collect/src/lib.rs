//! 设备采集引擎：连接池（Supervisor）与单连接执行体（Wire）。
//!
//! - Supervisor 周期性对账：为每个已启用但未连接的槽位建立连接并启动 Wire
//! - Wire 内部四个角色：读循环、写循环、错误监视、空闲监视
//! - 任一角色出错即整体拆除，由下一轮对账重建

mod error;
mod supervisor;
mod wire;

pub use error::{CollectError, WireExit};
pub use supervisor::Supervisor;
pub use wire::{WireHandle, WireParts, WireSettings, spawn_wire};

use std::time::Duration;

/// 采集引擎参数。
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// 默认轮询间隔（槽位可覆盖）
    pub read_interval: Duration,
    /// 默认空闲保活（槽位可覆盖）
    pub keepalive: Duration,
    /// 对账周期
    pub reconcile_interval: Duration,
    /// 空闲检查周期
    pub idle_check_interval: Duration,
    /// 单连接写队列容量
    pub write_queue: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_secs(1),
            keepalive: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(1),
            idle_check_interval: Duration::from_secs(1),
            write_queue: 10,
        }
    }
}

impl CollectOptions {
    pub(crate) fn sanitized(mut self) -> Self {
        let floor = Duration::from_millis(1);
        self.read_interval = self.read_interval.max(floor);
        self.reconcile_interval = self.reconcile_interval.max(floor);
        self.idle_check_interval = self.idle_check_interval.max(floor);
        if self.write_queue == 0 {
            self.write_queue = 1;
        }
        self
    }
}

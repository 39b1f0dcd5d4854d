//! 驱动能力契约与驱动注册表
//!
//! 每次 `connect` 都返回一个全新的已连接实例，重连时不复用旧实例。
//! 同一实例上的方法不会被并发调用（`&mut self` + 连接内部 I/O 锁）。

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::Tag;
use std::collections::HashMap;
use std::sync::Arc;

/// 已连接的驱动实例
#[async_trait]
pub trait Driver: Send {
    fn name(&self) -> &str;

    /// 就地填充每个 IO 标签的 `value`。返回错误时部分填充结果无效。
    async fn read(&mut self, tags: &mut [Tag]) -> Result<(), ProtocolError>;

    /// 将标签值（原始量）写到设备
    async fn write(&mut self, tags: &[Tag]) -> Result<(), ProtocolError>;

    /// 释放传输资源
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

/// 驱动工厂，按槽位参数创建连接
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// 注册名，对应 `Slot::driver`
    fn name(&self) -> &str;

    async fn connect(&self, params: &str) -> Result<Box<dyn Driver>, ProtocolError>;
}

/// 驱动注册表：name -> factory
#[derive(Default, Clone)]
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，同名时替换并返回旧工厂
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) -> Option<Arc<dyn DriverFactory>> {
        self.factories.insert(factory.name().to_string(), factory)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories.get(name).cloned()
    }

    /// 已注册的驱动名（排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

//! 虚拟驱动
//!
//! 不连接任何物理设备，读写进程内寄存器库，键为 `params`（命名空间）+ `address`。
//! 用于演示和无硬件的冒烟运行。

use crate::driver::{Driver, DriverFactory};
use crate::error::ProtocolError;
use crate::types::coerce_value;
use async_trait::async_trait;
use domain::{Tag, TagValue};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const VIRTUAL: &str = "VIRTUAL";

/// 进程内寄存器库，可被多个驱动实例共享
#[derive(Debug, Default)]
pub struct VirtualBank {
    values: RwLock<HashMap<(String, String), TagValue>>,
}

impl VirtualBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, address: &str) -> Option<TagValue> {
        self.values
            .read()
            .ok()?
            .get(&(namespace.to_string(), address.to_string()))
            .cloned()
    }

    pub fn set(
        &self,
        namespace: &str,
        address: &str,
        value: TagValue,
    ) -> Result<(), ProtocolError> {
        self.values
            .write()
            .map_err(|_| ProtocolError::DataParse("lock failed".to_string()))?
            .insert((namespace.to_string(), address.to_string()), value);
        Ok(())
    }
}

/// 虚拟驱动工厂
#[derive(Debug, Default, Clone)]
pub struct VirtualFactory {
    bank: Arc<VirtualBank>,
}

impl VirtualFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank(bank: Arc<VirtualBank>) -> Self {
        Self { bank }
    }

    pub fn bank(&self) -> Arc<VirtualBank> {
        Arc::clone(&self.bank)
    }
}

#[async_trait]
impl DriverFactory for VirtualFactory {
    fn name(&self) -> &str {
        VIRTUAL
    }

    async fn connect(&self, params: &str) -> Result<Box<dyn Driver>, ProtocolError> {
        Ok(Box::new(VirtualDriver {
            namespace: params.trim().to_string(),
            bank: Arc::clone(&self.bank),
            closed: false,
        }))
    }
}

/// 虚拟驱动实例
pub struct VirtualDriver {
    namespace: String,
    bank: Arc<VirtualBank>,
    closed: bool,
}

#[async_trait]
impl Driver for VirtualDriver {
    fn name(&self) -> &str {
        VIRTUAL
    }

    async fn read(&mut self, tags: &mut [Tag]) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::Closed);
        }
        for tag in tags.iter_mut() {
            let stored = self
                .bank
                .get(&self.namespace, &tag.address)
                .and_then(|value| coerce_value(&value, tag.data_type));
            tag.value = Some(stored.unwrap_or_else(|| TagValue::default_for(tag.data_type)));
        }
        Ok(())
    }

    async fn write(&mut self, tags: &[Tag]) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::Closed);
        }
        for tag in tags {
            if let Some(value) = tag.value.as_ref() {
                self.bank.set(&self.namespace, &tag.address, value.clone())?;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.closed = true;
        Ok(())
    }
}

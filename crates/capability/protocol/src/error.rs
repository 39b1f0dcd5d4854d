//! 协议错误类型定义

/// 驱动通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 设备返回的 Modbus 异常码（请求已送达，链路正常）
    #[error("modbus exception: {0}")]
    Exception(String),

    /// MQTT 错误
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 不支持的类型或功能码
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 驱动已关闭
    #[error("driver closed")]
    Closed,
}

impl ProtocolError {
    /// 链路层错误：连接已不可用，需要重建。
    ///
    /// 其余错误（参数、数据、不支持的类型、设备异常码）只影响单个标签。
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Io(_)
                | Self::Modbus(_)
                | Self::Mqtt(_)
                | Self::Timeout(_)
                | Self::Closed
        )
    }
}

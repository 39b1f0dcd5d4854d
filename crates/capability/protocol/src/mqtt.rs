//! MQTT 驱动
//!
//! 订阅 `{topic_prefix}/{device}/data`，报文格式 `{"data": {"<address>": <value>}}`；
//! `read` 返回最近收到的值，`write` 以相同格式发布到 `{topic_prefix}/{device}/data/set`。
//! 事件循环出错后驱动视为断开，下一次 `read` 返回错误。

use crate::driver::{Driver, DriverFactory};
use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{DataType, Tag, TagValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const MQTT: &str = "MQTT";

/// MQTT 槽位参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttParams {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// 设备标识，参与主题拼接
    pub device: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 等待 CONNACK 的超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "ems/dev".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

impl MqttParams {
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }

    pub fn data_topic(&self) -> String {
        format!("{}/{}/data", self.topic_prefix.trim_end_matches('/'), self.device)
    }

    pub fn set_topic(&self) -> String {
        format!("{}/set", self.data_topic())
    }
}

/// MQTT 驱动工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttFactory;

#[async_trait]
impl DriverFactory for MqttFactory {
    fn name(&self) -> &str {
        MQTT
    }

    async fn connect(&self, params: &str) -> Result<Box<dyn Driver>, ProtocolError> {
        let params = MqttParams::from_json(params)?;
        let driver = MqttDriver::connect(params).await?;
        Ok(Box::new(driver))
    }
}

#[derive(Default)]
struct MqttShared {
    latest: RwLock<HashMap<String, Value>>,
    failure: RwLock<Option<String>>,
}

/// 已连接的 MQTT 驱动
pub struct MqttDriver {
    client: rumqttc::AsyncClient,
    set_topic: String,
    shared: Arc<MqttShared>,
    cancel: CancellationToken,
}

impl MqttDriver {
    pub async fn connect(params: MqttParams) -> Result<Self, ProtocolError> {
        let client_id = format!("ems-gateway-{}", uuid::Uuid::new_v4());
        let mut options = rumqttc::MqttOptions::new(client_id, params.host.clone(), params.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (params.username.as_ref(), params.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 10);
        let data_topic = params.data_topic();
        client
            .subscribe(data_topic.clone(), rumqttc::QoS::AtMostOnce)
            .await
            .map_err(|err| ProtocolError::Mqtt(err.to_string()))?;

        let shared = Arc::new(MqttShared::default());
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        let loop_shared = Arc::clone(&shared);
        let loop_cancel = cancel.clone();
        let loop_topic = data_topic.clone();
        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            loop {
                let event = tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    event = eventloop.poll() => event,
                };
                match event {
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                        if publish.topic != loop_topic {
                            continue;
                        }
                        match parse_envelope(&publish.payload) {
                            Ok(values) => {
                                if let Ok(mut latest) = loop_shared.latest.write() {
                                    latest.extend(values);
                                }
                            }
                            Err(err) => {
                                warn!(target: "ems.protocol", topic = %publish.topic, error = %err, "mqtt_payload_skipped");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let message = err.to_string();
                        warn!(target: "ems.protocol", error = %message, "mqtt_eventloop_failed");
                        if let Ok(mut failure) = loop_shared.failure.write() {
                            *failure = Some(message.clone());
                        }
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Err(message));
                        }
                        break;
                    }
                }
            }
        });

        let connect_timeout = Duration::from_millis(params.connect_timeout_ms);
        let outcome = timeout(connect_timeout, ready_rx).await;
        let ready = match outcome {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(ProtocolError::Connection(message)),
            Ok(Err(_)) => Err(ProtocolError::Connection("event loop stopped".to_string())),
            Err(_) => Err(ProtocolError::Timeout(format!(
                "connack from {}:{}",
                params.host, params.port
            ))),
        };
        if let Err(err) = ready {
            cancel.cancel();
            return Err(err);
        }

        info!(target: "ems.protocol", host = %params.host, topic = %data_topic, "mqtt_connected");
        Ok(Self {
            client,
            set_topic: params.set_topic(),
            shared,
            cancel,
        })
    }
}

#[async_trait]
impl Driver for MqttDriver {
    fn name(&self) -> &str {
        MQTT
    }

    async fn read(&mut self, tags: &mut [Tag]) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Closed);
        }
        if let Some(message) = self
            .shared
            .failure
            .read()
            .map_err(|_| ProtocolError::Mqtt("lock failed".to_string()))?
            .clone()
        {
            return Err(ProtocolError::Connection(message));
        }
        let latest = self
            .shared
            .latest
            .read()
            .map_err(|_| ProtocolError::Mqtt("lock failed".to_string()))?;
        for tag in tags.iter_mut() {
            if let Some(raw) = latest.get(&tag.address) {
                tag.value = json_to_value(tag.data_type, raw);
            }
        }
        Ok(())
    }

    async fn write(&mut self, tags: &[Tag]) -> Result<(), ProtocolError> {
        let mut data = Map::new();
        for tag in tags {
            if let Some(value) = tag.value.as_ref() {
                data.insert(tag.address.clone(), value_to_json(value));
            }
        }
        if data.is_empty() {
            return Ok(());
        }
        let payload = json!({ "data": data }).to_string();
        self.client
            .publish(
                self.set_topic.clone(),
                rumqttc::QoS::AtLeastOnce,
                false,
                payload.into_bytes(),
            )
            .await
            .map_err(|err| ProtocolError::Mqtt(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let result = self.client.disconnect().await;
        self.cancel.cancel();
        result.map_err(|err| ProtocolError::Mqtt(err.to_string()))
    }
}

impl Drop for MqttDriver {
    /// 未经 `close` 直接丢弃时也停止事件循环任务
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 解析 `{"data": {...}}`
fn parse_envelope(payload: &[u8]) -> Result<Map<String, Value>, ProtocolError> {
    let mut root: Value =
        serde_json::from_slice(payload).map_err(|e| ProtocolError::DataParse(e.to_string()))?;
    match root.get_mut("data").map(Value::take) {
        Some(Value::Object(data)) => Ok(data),
        _ => Err(ProtocolError::DataParse("missing data object".to_string())),
    }
}

/// JSON -> 标签值，布尔按 1/0 参与数值
pub fn json_to_value(data_type: DataType, raw: &Value) -> Option<TagValue> {
    match data_type {
        DataType::Bool => match raw {
            Value::Bool(v) => Some(TagValue::Bool(*v)),
            Value::Number(n) => n.as_f64().map(|v| TagValue::Bool(v != 0.0)),
            _ => None,
        },
        DataType::String => match raw {
            Value::String(s) => Some(TagValue::String(s.clone())),
            Value::Null => None,
            other => Some(TagValue::String(other.to_string())),
        },
        _ => {
            let number = match raw {
                Value::Number(n) => n.as_f64(),
                Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }?;
            TagValue::from_f64(data_type, number)
        }
    }
}

pub fn value_to_json(value: &TagValue) -> Value {
    match value {
        TagValue::Bool(v) => json!(v),
        TagValue::I8(v) => json!(v),
        TagValue::U8(v) => json!(v),
        TagValue::I16(v) => json!(v),
        TagValue::U16(v) => json!(v),
        TagValue::I32(v) => json!(v),
        TagValue::U32(v) => json!(v),
        TagValue::I64(v) => json!(v),
        TagValue::U64(v) => json!(v),
        TagValue::F32(v) => json!(v),
        TagValue::F64(v) => json!(v),
        TagValue::String(v) => json!(v),
    }
}

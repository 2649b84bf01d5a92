//! message.rs
//!
//! 平台消息模型：消息 body、附件表、pass-through 数据，以及节点向平台发送事件的通道。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::trace;

use crate::node_type::NodeError;

/// 消息上的一个附件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        rename = "content-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
}

/// 平台消息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "empty_body")]
    pub body: Value,
    #[serde(default)]
    pub attachments: BTreeMap<String, Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<Value>,
}

fn empty_body() -> Value {
    Value::Object(Map::new())
}

impl Message {
    /// `newMessageWithBody`
    pub fn with_body(body: Value) -> Self {
        Self {
            body,
            attachments: BTreeMap::new(),
            passthrough: None,
        }
    }

    /// body 为空对象的消息 (trigger 轮询使用)。
    pub fn empty() -> Self {
        Self::with_body(empty_body())
    }

    pub fn with_attachments(mut self, attachments: BTreeMap<String, Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_passthrough(mut self, passthrough: Value) -> Self {
        self.passthrough = Some(passthrough);
        self
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

/// 节点向平台发出的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum EmitEvent {
    Data(Message),
    End,
    /// 请平台稍后重投当前消息，携带错误描述。
    Rebound(String),
    /// 刷新后的认证配置，需要由平台持久化。
    UpdateKeys(Value),
}

impl EmitEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            EmitEvent::Data(_) => "data",
            EmitEvent::End => "end",
            EmitEvent::Rebound(_) => "rebound",
            EmitEvent::UpdateKeys(_) => "updateKeys",
        }
    }
}

/// 平台事件通道。调用方保证一次只有一个 `emit` 在进行中：
/// 上一个 future 完成之后才会发出下一个事件。
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, event: EmitEvent) -> Result<(), NodeError>;
}

/// 把事件按顺序记录在内存中的 emitter。
///
/// 如果有两个 `emit` 同时在进行中，会返回 `NodeError::Emit`。
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<EmitEvent>>,
    in_flight: AtomicBool,
}

impl RecordingEmitter {
    pub async fn events(&self) -> Vec<EmitEvent> {
        self.events.lock().await.clone()
    }

    /// 所有 `data` 事件携带的消息。
    pub async fn data(&self) -> Vec<Message> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                EmitEvent::Data(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn count(&self, event_name: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.event_name() == event_name)
            .count()
    }
}

#[async_trait]
impl Emitter for RecordingEmitter {
    async fn emit(&self, event: EmitEvent) -> Result<(), NodeError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(NodeError::Emit(format!(
                "`{}` emitted while another emission is in flight",
                event.event_name()
            )));
        }
        trace!("emit {}", event.event_name());
        tokio::task::yield_now().await;
        self.events.lock().await.push(event);
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }
}

//! node_type.rs
//!
//! 定义所有节点共同遵循的核心接口(`NodeType`)，以及执行过程中使用的上下文、输出、错误类型。

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use restflow_jmes::EvaluationError;
use serde_json::Value;
use thiserror::Error;

use crate::message::{Emitter, Message};

/// 会触发平台重投 (rebound) 的 HTTP 状态码。
pub const REBOUND_STATUS_CODES: [u16; 7] = [408, 423, 429, 500, 502, 503, 504];

/// 节点执行时的上下文信息：
/// - `parameters`: JSON 格式的节点配置；
/// - `message`: 上游传入的消息 (trigger 轮询时为空消息)；
/// - `emitter`: 平台的事件通道 (`data`/`end`/`rebound`/`updateKeys`)。
pub struct NodeExecutionContext {
    pub parameters: Value,
    pub message: Message,
    pub emitter: Arc<dyn Emitter>,
}

/// 节点执行结果。
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// 单条结果消息，交给平台发出。
    Message(Message),
    /// 结果已经通过 emitter 发出 (拆分结果或 rebound)。
    Emitted,
}

/// 节点执行过程中可能发生的错误类型。
#[derive(Error, Debug)]
pub enum NodeError {
    /// URL、method、auth 等配置缺失或非法。
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// DNS、连接、超时等网络层故障。`code` 是 `ETIMEDOUT` 之类的简短错误码。
    #[error("{message}")]
    Transport { code: &'static str, message: String },

    /// 4xx/5xx (以及未跟随的 3xx) 响应。
    #[error("Code: {code} Message: {message}")]
    HttpStatus {
        code: u16,
        message: String,
        body: String,
    },

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Auth(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("Emit failed: {0}")]
    Emit(String),
}

impl NodeError {
    /// 平台侧展示的错误名称。
    pub fn name(&self) -> &'static str {
        match self {
            NodeError::Config(_) => "Config error",
            NodeError::Evaluation(_) => "Evaluation error",
            NodeError::Transport { .. } => "Transport error",
            NodeError::HttpStatus { .. } => "HTTP error",
            NodeError::Parse(_) => "Parse error",
            NodeError::Auth(_) => "Auth error",
            NodeError::Attachment(_) => "Attachment error",
            NodeError::Emit(_) => "Emit error",
        }
    }

    pub fn transport(code: &'static str, message: impl Into<String>) -> Self {
        NodeError::Transport {
            code,
            message: message.into(),
        }
    }

    /// 由 reqwest 的错误推断错误码。构建请求阶段的错误 (非法 URL、header) 属于配置错误。
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_builder() {
            return NodeError::Config(e.to_string());
        }
        let code = if e.is_timeout() {
            "ETIMEDOUT"
        } else if e.is_connect() && is_dns_failure(e) {
            "ENOTFOUND"
        } else if e.is_connect() {
            "ECONNREFUSED"
        } else if e.is_redirect() {
            "EMAXREDIRECTS"
        } else {
            "EREQUEST"
        };
        NodeError::transport(code, e.to_string())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            NodeError::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否属于可以让平台稍后重试的错误。
    pub fn is_reboundable(&self) -> bool {
        match self {
            NodeError::Transport { .. } => true,
            NodeError::HttpStatus { code, .. } => REBOUND_STATUS_CODES.contains(code),
            _ => false,
        }
    }
}

/// 连接失败是否发生在域名解析阶段 (hyper 的 "dns error")。
fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        let text = err.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = err.source();
    }
    false
}

/// 所有节点必须实现的核心 Trait：`NodeType`。
#[async_trait]
pub trait NodeType: Send + Sync {
    /// 节点的内在标识 (比如 "httpRequestAction")，用于注册与检索。
    fn name(&self) -> &str;

    /// UI要显示的节点名称。
    fn display_name(&self) -> &str;

    /// 异步执行节点逻辑:
    ///  - 解析/验证parameters
    ///  - 实际执行操作 (HTTP 等)
    ///  - 返回 NodeOutput 或 NodeError
    async fn execute(&self, ctx: &NodeExecutionContext) -> Result<NodeOutput, NodeError>;
}

// src/http/mod.rs
//! HTTP 请求节点。
//!
//! 管线按阶段拆分：`request` (配置解析) -> `auth` -> `body` -> `executor`
//! -> `classifier` -> `decoder` -> `result`，由 `http_handler` 串起来。

pub mod auth;
pub mod body;
pub mod classifier;
pub mod decoder;
pub mod executor;
pub mod http_handler;
pub mod http_params;
pub mod request;
pub mod result;
pub mod xml;

use std::sync::Arc;

use crate::registry::NodeRegistry;

pub use http_handler::{HttpRequestAction, HttpRequestTrigger, NodeServices};

/// 把 HTTP action 和 trigger 注册到 NodeRegistry
pub fn register_node(registry: &mut NodeRegistry, services: &NodeServices) {
    registry.register(Arc::new(HttpRequestAction::new(services.clone())));
    registry.register(Arc::new(HttpRequestTrigger::new(services.clone())));
}

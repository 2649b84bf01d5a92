//! registry.rs
//!
//! 提供一个 `NodeRegistry` 结构，用于维护 (name -> Arc<dyn NodeType>)。
//! 启动时一次性注册 `httpRequestAction` / `httpRequestTrigger`，之后按名称检索。

use std::collections::HashMap;
use std::sync::Arc;

use crate::node_type::NodeType;

/// 节点注册表。注册只发生在启动阶段，因此不加锁。
#[derive(Default)]
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeType>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 `node.name()` 为 key 注册，同名节点会被替换
    pub fn register(&mut self, node: Arc<dyn NodeType>) {
        self.handlers.insert(node.name().to_owned(), node);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeType>> {
        self.handlers.get(name).cloned()
    }

    /// 已注册的节点名称，按字母排序
    pub fn list_nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

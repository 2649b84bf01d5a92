// restflow-nodes/src/registry_helper.rs

use crate::http::{self, NodeServices};
use crate::registry::NodeRegistry;

/// 一次性注册所有节点，共用同一组服务。
pub fn register_all_nodes(registry: &mut NodeRegistry, services: &NodeServices) {
    http::register_node(registry, services);
}

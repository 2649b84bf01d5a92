mod registry;

pub mod attachments;
pub mod http;
pub mod message;
pub mod node_type;
pub mod rest_client;
pub mod settings;

pub use http::NodeServices;
pub use message::*;
pub use node_type::*;
pub use registry::*;
pub use settings::Settings;

pub mod registry_helper;
pub use registry_helper::register_all_nodes;

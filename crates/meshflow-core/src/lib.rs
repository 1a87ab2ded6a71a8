pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod graph;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::ExecutionContext;
pub use error::{MeshflowError, Result};
pub use event::{EventBus, WorkflowEvent};
pub use graph::{Edge, EdgeType, Node, NodeStatus, NodeType, WorkflowGraph};
pub use types::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshflowError {
    // Graph errors
    #[error("Workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Node not found in graph: {0}")]
    NodeNotFound(String),

    // Execution errors
    #[error("Node execution failed: {node}: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Execution cancelled")]
    Cancelled,

    // Transport errors
    #[error("Agent transport failed: {agent}: {message}")]
    Transport { agent: String, message: String },

    #[error("Agent {agent} timed out after {timeout_ms}ms")]
    Timeout { agent: String, timeout_ms: u64 },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MeshflowError>;

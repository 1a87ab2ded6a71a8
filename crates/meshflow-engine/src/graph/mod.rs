//! Graph execution: structural validation, condition expressions and the
//! depth-first traversal engine.
//!
//! A workflow is a directed graph of `Node`s connected by `Edge`s. The
//! `WorkflowValidator` gates every run. The `GraphExecutor` then starts at
//! every trigger node and walks taken edges depth-first, writing each node's
//! output to the shared context under `{node_id}_output`.

pub mod executor;
pub mod expression;
pub mod validator;

pub use executor::GraphExecutor;
pub use expression::{evaluate, render_placeholders, ExpressionError};
pub use validator::{ValidationResult, WorkflowValidator};

use futures::future::BoxFuture;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::graph::{Node, WorkflowGraph};
use crate::types::*;

/// Runs one node against the current context.
pub trait NodeExecutor: Send + Sync + 'static {
    /// Execute `node`. An `Err` marks the node failed and triggers error routing.
    fn execute<'a>(
        &'a self,
        node: &'a Node,
        context: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>>;
}

/// Picks the outcome of a decision node.
pub trait DecisionPolicy: Send + Sync + 'static {
    fn decide(&self, context: &ExecutionContext) -> Decision;
}

/// Delivers a message to an agent and awaits the reply.
///
/// Implementations own timeouts and retries; the scheduler does neither.
pub trait AgentTransport: Send + Sync + 'static {
    fn send_message(
        &self,
        agent_id: &str,
        message: AgentMessage,
    ) -> BoxFuture<'_, Result<AgentReply>>;
}

/// Registered graphs keyed by workflow id.
pub trait WorkflowStore: Send + Sync + 'static {
    /// Store a graph, replacing any graph with the same id.
    fn save(&self, graph: WorkflowGraph) -> BoxFuture<'_, Result<()>>;

    fn get(&self, workflow_id: &str) -> BoxFuture<'_, Result<Option<WorkflowGraph>>>;

    fn list(&self) -> BoxFuture<'_, Result<Vec<WorkflowGraph>>>;

    fn remove(&self, workflow_id: &str) -> BoxFuture<'_, Result<bool>>;
}

/// Workflow execution records keyed by execution id.
pub trait ExecutionStore: Send + Sync + 'static {
    /// Insert or replace a record.
    fn put(&self, execution: WorkflowExecution) -> BoxFuture<'_, Result<()>>;

    fn get(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Option<WorkflowExecution>>>;

    /// All records, optionally filtered by workflow id.
    fn list(&self, workflow_id: Option<&str>) -> BoxFuture<'_, Result<Vec<WorkflowExecution>>>;
}

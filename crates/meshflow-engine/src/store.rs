//! Process-lifetime stores for workflows and execution records.
//!
//! Both are unbounded and never evict. Clones share the same underlying map.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use meshflow_core::error::Result;
use meshflow_core::graph::WorkflowGraph;
use meshflow_core::traits::{ExecutionStore, WorkflowStore};
use meshflow_core::types::{ExecutionId, WorkflowExecution};

/// Registered graphs keyed by workflow id, listed in id order.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    workflows: Arc<RwLock<BTreeMap<String, WorkflowGraph>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    fn save(&self, graph: WorkflowGraph) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.workflows.write().await.insert(graph.id.clone(), graph);
            Ok(())
        })
    }

    fn get(&self, workflow_id: &str) -> BoxFuture<'_, Result<Option<WorkflowGraph>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move { Ok(self.workflows.read().await.get(&workflow_id).cloned()) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<WorkflowGraph>>> {
        Box::pin(async move { Ok(self.workflows.read().await.values().cloned().collect()) })
    }

    fn remove(&self, workflow_id: &str) -> BoxFuture<'_, Result<bool>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move { Ok(self.workflows.write().await.remove(&workflow_id).is_some()) })
    }
}

/// Execution records keyed by execution id.
#[derive(Clone, Default)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<HashMap<ExecutionId, WorkflowExecution>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn put(&self, execution: WorkflowExecution) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.executions
                .write()
                .await
                .insert(execution.id.clone(), execution);
            Ok(())
        })
    }

    fn get(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Option<WorkflowExecution>>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.executions.read().await.get(&id).cloned()) })
    }

    /// Newest first.
    fn list(&self, workflow_id: Option<&str>) -> BoxFuture<'_, Result<Vec<WorkflowExecution>>> {
        let workflow_id = workflow_id.map(str::to_string);
        Box::pin(async move {
            let mut records: Vec<WorkflowExecution> = self
                .executions
                .read()
                .await
                .values()
                .filter(|e| workflow_id.as_deref().map_or(true, |w| e.workflow_id == w))
                .cloned()
                .collect();
            records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            Ok(records)
        })
    }
}

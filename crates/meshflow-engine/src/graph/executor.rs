use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use meshflow_core::config::EngineConfig;
use meshflow_core::context::{error_key, output_key};
use meshflow_core::error::{MeshflowError, Result};
use meshflow_core::event::{EventBus, WorkflowEvent};
use meshflow_core::graph::{DataMapping, Edge, EdgeType, Node, NodeStatus, NodeType, WorkflowGraph};
use meshflow_core::traits::{ExecutionStore, NodeExecutor, WorkflowStore};
use meshflow_core::types::{ExecutionId, ExecutionStatus, WorkflowExecution};
use meshflow_core::ExecutionContext;

use super::expression;
use super::validator::WorkflowValidator;
use crate::store::{InMemoryExecutionStore, InMemoryWorkflowStore};

/// Depth-first workflow executor.
///
/// Every trigger node is an entry point, visited in declaration order. Each
/// visit runs the node, writes its output to the context, then recurses
/// into every target reached by a taken edge before returning. Sibling
/// branches therefore run one after another, never concurrently.
///
/// A node reachable by several taken paths (a diamond) runs once per path
/// unless `EngineConfig::dedupe_visits` is set.
pub struct GraphExecutor {
    node_executor: Arc<dyn NodeExecutor>,
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    event_bus: Option<Arc<EventBus>>,
    config: EngineConfig,
    active: Mutex<HashMap<ExecutionId, CancellationToken>>,
}

/// Mutable state of one run. Owned so the recursive visit can reborrow it.
struct Run {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    execution: WorkflowExecution,
    cancel: CancellationToken,
    visited: HashSet<String>,
}

impl GraphExecutor {
    /// Executor backed by in-memory stores.
    pub fn new(node_executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            node_executor,
            workflows: Arc::new(InMemoryWorkflowStore::new()),
            executions: Arc::new(InMemoryExecutionStore::new()),
            event_bus: None,
            config: EngineConfig::default(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.workflows = store;
        self
    }

    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.executions = store;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Store a graph for later `execute_registered` calls.
    ///
    /// Returns the workflow id, generating one when the graph has none.
    pub async fn register_workflow(&self, mut graph: WorkflowGraph) -> Result<String> {
        if graph.id.is_empty() {
            graph.id = uuid::Uuid::new_v4().to_string();
        }
        let id = graph.id.clone();
        self.workflows.save(graph).await?;
        debug!(workflow_id = %id, "Workflow registered");
        Ok(id)
    }

    /// Run a registered workflow.
    pub async fn execute_registered(
        &self,
        workflow_id: &str,
        initial_context: ExecutionContext,
    ) -> Result<WorkflowExecution> {
        let graph = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| MeshflowError::WorkflowNotFound(workflow_id.to_string()))?;
        self.execute_workflow(&graph.id, &graph.nodes, &graph.edges, initial_context)
            .await
    }

    /// Validate and run a graph.
    ///
    /// Validation failure returns `Err(Validation)` before any record is
    /// created or node executed. Node failures are not errors: they land in
    /// the record's `error_log` and the run still completes.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        nodes: &[Node],
        edges: &[Edge],
        initial_context: ExecutionContext,
    ) -> Result<WorkflowExecution> {
        self.execute_with_cancel(
            workflow_id,
            nodes,
            edges,
            initial_context,
            CancellationToken::new(),
        )
        .await
    }

    /// Like `execute_workflow`, with a caller-owned cancellation token.
    ///
    /// The token is checked before each node; once cancelled, no further
    /// node starts and the run ends `cancelled`.
    pub async fn execute_with_cancel(
        &self,
        workflow_id: &str,
        nodes: &[Node],
        edges: &[Edge],
        initial_context: ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<WorkflowExecution> {
        let validation = WorkflowValidator::validate(nodes, edges);
        if !validation.is_valid {
            warn!(
                workflow_id,
                errors = validation.errors.len(),
                "Workflow failed validation"
            );
            return Err(MeshflowError::Validation(validation.errors));
        }

        let mut run = Run {
            nodes: nodes.iter().map(|n| (n.id.clone(), n.clone())).collect(),
            edges: edges.to_vec(),
            execution: WorkflowExecution::start(workflow_id, initial_context),
            cancel: cancel.clone(),
            visited: HashSet::new(),
        };
        let execution_id = run.execution.id.clone();

        self.executions.put(run.execution.clone()).await?;
        self.lock_active().insert(execution_id.clone(), cancel);

        info!(%execution_id, workflow_id, "Workflow execution started");
        self.emit(WorkflowEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            workflow_id: workflow_id.to_string(),
        });

        let triggers: Vec<String> = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Trigger)
            .map(|n| n.id.clone())
            .collect();

        let mut outcome = Ok(());
        for trigger in triggers {
            outcome = self.visit(&mut run, trigger).await;
            if outcome.is_err() {
                break;
            }
        }

        let status = match outcome {
            Ok(()) => ExecutionStatus::Completed,
            Err(MeshflowError::Cancelled) => {
                info!(%execution_id, "Workflow execution cancelled");
                ExecutionStatus::Cancelled
            }
            Err(e) => {
                error!(%execution_id, error = %e, "Workflow execution failed");
                let at = run.execution.current_node.clone().unwrap_or_default();
                run.execution.record_error(&at, e.to_string());
                ExecutionStatus::Failed
            }
        };

        let mut execution = run.execution;
        execution.finish(status);
        self.lock_active().remove(&execution_id);
        self.executions.put(execution.clone()).await?;

        info!(
            %execution_id,
            status = %execution.status,
            duration_ms = execution.metrics.duration,
            errors = execution.metrics.error_count,
            "Workflow execution finished"
        );
        self.emit(WorkflowEvent::ExecutionFinished {
            execution_id,
            status: execution.status,
            duration_ms: execution.metrics.duration,
        });

        Ok(execution)
    }

    /// Request cancellation of a running execution.
    ///
    /// Returns `false` when no such execution is in progress.
    pub fn cancel(&self, execution_id: &ExecutionId) -> bool {
        match self.lock_active().get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<WorkflowExecution>> {
        self.executions.get(execution_id).await
    }

    /// Executions newest first, optionally for one workflow only.
    pub async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowExecution>> {
        self.executions.list(workflow_id).await
    }

    fn visit<'a>(&'a self, run: &'a mut Run, node_id: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if run.cancel.is_cancelled() {
                return Err(MeshflowError::Cancelled);
            }
            if self.config.dedupe_visits && !run.visited.insert(node_id.clone()) {
                debug!(node_id = %node_id, "Node already executed, skipping");
                return Ok(());
            }

            let node = run
                .nodes
                .get(&node_id)
                .cloned()
                .ok_or_else(|| MeshflowError::NodeNotFound(node_id.clone()))?;
            let execution_id = run.execution.id.clone();

            run.execution
                .node_states
                .insert(node_id.clone(), NodeStatus::Running);
            run.execution.current_node = Some(node_id.clone());
            run.execution.trace.push(node_id.clone());
            debug!(node_id = %node_id, node_type = %node.node_type, "Executing node");
            self.emit(WorkflowEvent::NodeStarted {
                execution_id: execution_id.clone(),
                node_id: node_id.clone(),
            });

            let start = Instant::now();
            let result = self
                .node_executor
                .execute(&node, &run.execution.context)
                .await;

            match result {
                Ok(output) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    run.execution.context.set(output_key(&node_id), output.value);
                    run.execution.metrics.tokens_used += output.tokens_used;
                    run.execution.metrics.cost += output.cost;
                    run.execution
                        .node_states
                        .insert(node_id.clone(), NodeStatus::Completed);
                    debug!(node_id = %node_id, elapsed_ms, "Node completed");
                    self.emit(WorkflowEvent::NodeCompleted {
                        execution_id,
                        node_id: node_id.clone(),
                        elapsed_ms,
                    });

                    let outgoing: Vec<Edge> = run
                        .edges
                        .iter()
                        .filter(|e| e.source == node_id && e.edge_type != EdgeType::Error)
                        .cloned()
                        .collect();
                    self.follow(run, outgoing).await
                }
                Err(e) => {
                    let message = e.to_string();
                    run.execution
                        .node_states
                        .insert(node_id.clone(), NodeStatus::Failed);
                    run.execution.record_error(&node_id, message.clone());
                    warn!(node_id = %node_id, error = %message, "Node failed");
                    self.emit(WorkflowEvent::NodeFailed {
                        execution_id,
                        node_id: node_id.clone(),
                        error: message.clone(),
                    });

                    let handlers: Vec<Edge> = run
                        .edges
                        .iter()
                        .filter(|e| e.source == node_id && e.edge_type == EdgeType::Error)
                        .cloned()
                        .collect();
                    if handlers.is_empty() {
                        debug!(node_id = %node_id, "No error edge, branch ends here");
                        return Ok(());
                    }

                    run.execution
                        .context
                        .set(error_key(&node_id), json!(message));
                    self.follow(run, handlers).await
                }
            }
        })
    }

    /// Take each edge whose condition holds, applying its data mapping before
    /// descending into the target.
    async fn follow(&self, run: &mut Run, edges: Vec<Edge>) -> Result<()> {
        for edge in edges {
            if !edge_taken(&edge, &run.execution.context) {
                debug!(edge_id = %edge.id, "Edge condition not met");
                self.emit(WorkflowEvent::EdgeSkipped {
                    execution_id: run.execution.id.clone(),
                    edge_id: edge.id.clone(),
                });
                continue;
            }
            if let Some(mapping) = &edge.data_mapping {
                apply_mapping(&mut run.execution.context, mapping, &edge.id);
            }
            self.visit(run, edge.target).await?;
        }
        Ok(())
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An edge without a condition is always taken. A condition that fails to
/// evaluate counts as false.
fn edge_taken(edge: &Edge, context: &ExecutionContext) -> bool {
    let Some(condition) = edge.condition.as_deref().filter(|c| !c.trim().is_empty()) else {
        return true;
    };
    match expression::evaluate(condition, context) {
        Ok(taken) => taken,
        Err(e) => {
            debug!(edge_id = %edge.id, error = %e, "Condition evaluation failed, edge not taken");
            false
        }
    }
}

/// Copy `source_field` to `target_field`. A missing source leaves the
/// context untouched.
fn apply_mapping(context: &mut ExecutionContext, mapping: &DataMapping, edge_id: &str) {
    let Some(value) = context.resolve_path(&mapping.source_field).cloned() else {
        debug!(
            edge_id,
            source = %mapping.source_field,
            "Mapping source not present, skipped"
        );
        return;
    };
    if let Err(e) = context.set_path(&mapping.target_field, value) {
        warn!(edge_id, error = %e, "Data mapping failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedNodeExecutor;
    use meshflow_core::config::SimulationConfig;
    use meshflow_test_utils::{diamond_graph, linear_graph, FixedDecision};

    fn executor() -> GraphExecutor {
        GraphExecutor::new(Arc::new(SimulatedNodeExecutor::new(
            SimulationConfig::default(),
            Arc::new(FixedDecision::yes()),
        )))
    }

    async fn run(executor: &GraphExecutor, graph: &WorkflowGraph) -> WorkflowExecution {
        executor
            .execute_workflow(&graph.id, &graph.nodes, &graph.edges, ExecutionContext::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_run() {
        let exec = run(&executor(), &linear_graph()).await;
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.trace, vec!["t", "p", "e"]);
        assert_eq!(exec.context.get("t_output").unwrap()["triggered"], true);
        assert_eq!(exec.context.get("e_output").unwrap()["completed"], true);
        assert_eq!(exec.node_status("p"), NodeStatus::Completed);
        assert_eq!(exec.metrics.tokens_used, 150);
        assert!(exec.end_time.is_some());
    }

    #[tokio::test]
    async fn test_invalid_graph_creates_no_record() {
        let executor = executor();
        let mut graph = linear_graph();
        graph.nodes.retain(|n| n.node_type != NodeType::Trigger);

        let err = executor
            .execute_workflow("bad", &graph.nodes, &graph.edges, ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshflowError::Validation(ref errs) if errs.iter().any(|e| e.contains("trigger"))));
        assert!(executor.list_executions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_false_condition_leaves_target_pending() {
        let mut graph = linear_graph();
        graph.edges[1] = Edge::control("p", "e").with_condition("${a} > 5");
        let exec = executor()
            .execute_workflow(
                "cond",
                &graph.nodes,
                &graph.edges,
                ExecutionContext::from_value(json!({"a": 3})),
            )
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.node_status("e"), NodeStatus::Pending);
        assert!(exec.context.get("e_output").is_none());
    }

    #[tokio::test]
    async fn test_broken_condition_is_not_taken() {
        let mut graph = linear_graph();
        graph.edges[1] = Edge::control("p", "e").with_condition("${a} >");
        let exec = run(&executor(), &graph).await;
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.trace, vec!["t", "p"]);
    }

    #[tokio::test]
    async fn test_error_edge_routes_failure() {
        let graph = WorkflowGraph::new(
            vec![
                Node::new("t", NodeType::Trigger),
                Node::new("p", NodeType::Processor).with_config("fail", json!("model offline")),
                Node::new("h", NodeType::Integration),
                Node::new("e", NodeType::Terminal),
            ],
            vec![
                Edge::control("t", "p"),
                Edge::control("p", "e"),
                Edge::error("p", "h"),
            ],
        );
        let exec = run(&executor(), &graph).await;

        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.metrics.error_count, 1);
        assert_eq!(exec.error_log[0].node_id, "p");
        assert_eq!(exec.node_status("p"), NodeStatus::Failed);
        assert_eq!(exec.node_status("h"), NodeStatus::Completed);
        assert_eq!(exec.node_status("e"), NodeStatus::Pending);
        assert!(exec
            .context
            .get_str("p_error")
            .unwrap()
            .contains("model offline"));
    }

    #[tokio::test]
    async fn test_unhandled_failure_spares_siblings() {
        let graph = WorkflowGraph::new(
            vec![
                Node::new("t", NodeType::Trigger),
                Node::new("a", NodeType::Processor).with_config("fail", json!(true)),
                Node::new("b", NodeType::Processor),
                Node::new("e", NodeType::Terminal),
            ],
            vec![
                Edge::control("t", "a"),
                Edge::control("t", "b"),
                Edge::control("a", "e"),
                Edge::control("b", "e"),
            ],
        );
        let exec = run(&executor(), &graph).await;
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.trace, vec!["t", "a", "b", "e"]);
        assert_eq!(exec.metrics.error_count, 1);
    }

    #[tokio::test]
    async fn test_diamond_reexecutes_shared_descendant() {
        let exec = run(&executor(), &diamond_graph()).await;
        assert_eq!(exec.trace, vec!["t", "a", "e", "b", "e"]);
    }

    #[tokio::test]
    async fn test_diamond_dedupe() {
        let executor = executor().with_config(EngineConfig {
            dedupe_visits: true,
        });
        let exec = run(&executor, &diamond_graph()).await;
        assert_eq!(exec.trace, vec!["t", "a", "e", "b"]);
    }

    #[tokio::test]
    async fn test_data_mapping_applied_before_descent() {
        let mut graph = linear_graph();
        graph.edges[0] = Edge::data("t", "p").with_mapping("t_output.triggered", "p_input.flag");
        let exec = run(&executor(), &graph).await;
        assert_eq!(
            exec.context.resolve_path("p_input.flag"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let graph = linear_graph();
        let token = CancellationToken::new();
        token.cancel();
        let exec = executor()
            .execute_with_cancel(
                &graph.id,
                &graph.nodes,
                &graph.edges,
                ExecutionContext::new(),
                token,
            )
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert!(exec.trace.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_by_id_stops_running_execution() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let executor = Arc::new(
            GraphExecutor::new(Arc::new(SimulatedNodeExecutor::new(
                SimulationConfig {
                    node_latency_ms: 30,
                    ..SimulationConfig::default()
                },
                Arc::new(FixedDecision::yes()),
            )))
            .with_event_bus(bus),
        );

        let graph = linear_graph();
        let handle = tokio::spawn({
            let executor = executor.clone();
            async move { run(&executor, &graph).await }
        });

        let mut execution_id = None;
        loop {
            match rx.recv().await.unwrap() {
                WorkflowEvent::ExecutionStarted { execution_id: id, .. } => {
                    execution_id = Some(id);
                }
                WorkflowEvent::NodeStarted { node_id, .. } if node_id == "p" => break,
                _ => {}
            }
        }
        let execution_id = execution_id.unwrap();
        assert!(executor.cancel(&execution_id));

        let exec = handle.await.unwrap();
        assert_eq!(exec.id, execution_id);
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert_eq!(exec.trace, vec!["t", "p"]);
        assert_eq!(exec.node_status("p"), NodeStatus::Completed);
        assert_eq!(exec.node_status("e"), NodeStatus::Pending);

        let stored = executor.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert!(!executor.cancel(&execution_id));
    }

    #[tokio::test]
    async fn test_run_state_is_kept_off_the_graph() {
        let graph = linear_graph();
        let exec = run(&executor(), &graph).await;
        assert_eq!(exec.node_status("p"), NodeStatus::Completed);
        assert!(graph.nodes.iter().all(|n| n.status == NodeStatus::Pending));
    }

    #[tokio::test]
    async fn test_registered_workflow_and_lookup() {
        let executor = executor();
        let id = executor
            .register_workflow(linear_graph().with_id(""))
            .await
            .unwrap();
        assert!(!id.is_empty());

        let exec = executor
            .execute_registered(&id, ExecutionContext::new())
            .await
            .unwrap();
        let stored = executor.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(executor.list_executions(Some(id.as_str())).await.unwrap().len(), 1);

        let missing = executor
            .execute_registered("nope", ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(missing, MeshflowError::WorkflowNotFound(_)));
        assert!(!executor.cancel(&exec.id));
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let executor = executor().with_event_bus(bus);
        run(&executor, &linear_graph()).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
        }
        assert_eq!(kinds.first().unwrap(), "execution_started");
        assert_eq!(kinds.last().unwrap(), "execution_finished");
        assert_eq!(kinds.iter().filter(|k| *k == "node_completed").count(), 3);
    }
}

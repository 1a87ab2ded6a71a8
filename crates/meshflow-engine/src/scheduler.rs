use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshflow_core::config::SchedulerConfig;
use meshflow_core::context::output_key;
use meshflow_core::error::{MeshflowError, Result};
use meshflow_core::event::{EventBus, WorkflowEvent};
use meshflow_core::graph::{EdgeType, NodeType, WorkflowGraph};
use meshflow_core::traits::{AgentTransport, WorkflowStore};
use meshflow_core::types::{
    A2AExecutionReport, A2AWorkflowStep, AgentMessage, ExecutionLogEntry, LogEvent, StepOutcome,
    StepResult, StepStatus,
};
use meshflow_core::ExecutionContext;

use crate::store::InMemoryWorkflowStore;

/// Step id derived from an agent node id.
pub fn step_id(node_id: &str) -> String {
    format!("step-{}", node_id)
}

/// Wave-parallel executor for agent-to-agent steps.
///
/// One step is derived per `agent` node; incoming `a2a` edges become its
/// dependencies. Each wave dispatches every step whose dependencies have
/// all run, concurrently, and waits for the whole wave before computing
/// the next one. A failed step still counts as run so its dependents
/// proceed; they receive the failure in a separate section of their
/// message.
pub struct A2AScheduler {
    workflows: Arc<dyn WorkflowStore>,
    transport: Arc<dyn AgentTransport>,
    config: SchedulerConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl A2AScheduler {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self {
            workflows: Arc::new(InMemoryWorkflowStore::new()),
            transport,
            config: SchedulerConfig::default(),
            event_bus: None,
        }
    }

    /// Share a workflow store, e.g. with a `GraphExecutor`.
    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.workflows = store;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Store a graph, generating an id when it has none.
    pub async fn register_workflow(&self, mut graph: WorkflowGraph) -> Result<String> {
        if graph.id.is_empty() {
            graph.id = uuid::Uuid::new_v4().to_string();
        }
        let id = graph.id.clone();
        self.workflows.save(graph).await?;
        Ok(id)
    }

    /// Derive the step list of a registered workflow.
    pub async fn generate_a2a_steps(&self, workflow_id: &str) -> Result<Vec<A2AWorkflowStep>> {
        let graph = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| MeshflowError::WorkflowNotFound(workflow_id.to_string()))?;
        Ok(self.steps_for_graph(&graph))
    }

    /// One step per agent node, in node declaration order. Dependencies
    /// follow incoming a2a edge declaration order.
    pub fn steps_for_graph(&self, graph: &WorkflowGraph) -> Vec<A2AWorkflowStep> {
        graph
            .nodes_of_type(NodeType::Agent)
            .map(|node| {
                let mut config = node.config.clone();
                config
                    .entry("timeout")
                    .or_insert_with(|| json!(self.config.default_step_timeout_ms));

                let dependencies = graph
                    .incoming(&node.id)
                    .filter(|e| e.edge_type == EdgeType::A2a)
                    .map(|e| step_id(&e.source))
                    .collect();

                A2AWorkflowStep {
                    step_id: step_id(&node.id),
                    agent_id: node.config_str("agentId").unwrap_or(&node.id).to_string(),
                    action: node.config_str("action").unwrap_or("process").to_string(),
                    config,
                    dependencies,
                }
            })
            .collect()
    }

    /// Run a registered workflow's steps.
    ///
    /// A missing workflow is an `Err`; every other failure ends up in the
    /// report with `success: false`.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_message: &str,
    ) -> Result<A2AExecutionReport> {
        self.execute_with_cancel(workflow_id, initial_message, CancellationToken::new())
            .await
    }

    /// Like `execute_workflow`; the token is checked before each wave.
    pub async fn execute_with_cancel(
        &self,
        workflow_id: &str,
        initial_message: &str,
        cancel: CancellationToken,
    ) -> Result<A2AExecutionReport> {
        let steps = self.generate_a2a_steps(workflow_id).await?;
        Ok(self.execute_steps(steps, initial_message, cancel).await)
    }

    /// Run an explicit step list.
    pub async fn execute_steps(
        &self,
        steps: Vec<A2AWorkflowStep>,
        initial_message: &str,
        cancel: CancellationToken,
    ) -> A2AExecutionReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut run = SchedulerRun::new(initial_message);

        info!(run_id = %run_id, steps = steps.len(), "A2A workflow started");
        run.log(ExecutionLogEntry::new(
            LogEvent::WorkflowStart,
            format!("Starting A2A workflow with {} steps", steps.len()),
        ));

        let known: HashSet<&str> = steps.iter().map(|s| s.step_id.as_str()).collect();
        let mut unknown = Vec::new();
        for step in &steps {
            for dep in &step.dependencies {
                if !known.contains(dep.as_str()) {
                    unknown.push(format!("{} depends on unknown step {}", step.step_id, dep));
                }
            }
        }
        if !unknown.is_empty() {
            warn!(run_id = %run_id, "Malformed step graph");
            run.log(ExecutionLogEntry::new(
                LogEvent::SchedulingError,
                unknown.join("; "),
            ));
            return self.finish(&run_id, run, false);
        }

        let mut executed: HashSet<String> = HashSet::new();
        let mut pending = steps;

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                info!(run_id = %run_id, pending = pending.len(), "A2A workflow cancelled");
                run.log(ExecutionLogEntry::new(
                    LogEvent::Cancelled,
                    format!("Execution cancelled with {} steps pending", pending.len()),
                ));
                return self.finish(&run_id, run, false);
            }

            let (ready, blocked): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|s| s.dependencies.iter().all(|d| executed.contains(d)));
            pending = blocked;

            if ready.is_empty() {
                let ids: Vec<&str> = pending.iter().map(|s| s.step_id.as_str()).collect();
                warn!(run_id = %run_id, steps = ?ids, "Circular dependency between steps");
                run.log(ExecutionLogEntry::new(
                    LogEvent::CircularDependency,
                    format!("Circular dependency detected among steps: {}", ids.join(", ")),
                ));
                return self.finish(&run_id, run, false);
            }

            let wave = run.waves.len();
            let ids: Vec<String> = ready.iter().map(|s| s.step_id.clone()).collect();
            debug!(run_id = %run_id, wave, steps = ?ids, "Dispatching wave");
            run.log(ExecutionLogEntry::new(
                LogEvent::WaveStart,
                format!("Wave {}: {}", wave, ids.join(", ")),
            ));
            self.emit(WorkflowEvent::WaveStarted {
                run_id: run_id.clone(),
                wave,
                step_ids: ids.clone(),
            });
            run.waves.push(ids);

            let mut dispatches = Vec::with_capacity(ready.len());
            for step in &ready {
                run.log(
                    ExecutionLogEntry::new(
                        LogEvent::StepStart,
                        format!("Sending {} to agent {}", step.action, step.agent_id),
                    )
                    .for_step(&step.step_id, &step.agent_id),
                );
                self.emit(WorkflowEvent::StepStarted {
                    run_id: run_id.clone(),
                    step_id: step.step_id.clone(),
                    agent_id: step.agent_id.clone(),
                });
                let message = self.build_message(step, &run);
                dispatches.push(self.dispatch(step, message));
            }

            // Fan-in: no outcome is visible to anyone until the whole wave is back.
            let outcomes = futures::future::join_all(dispatches).await;

            for (step, (outcome, response_time)) in ready.iter().zip(outcomes) {
                self.record(&run_id, &mut run, step, outcome, response_time, wave);
                executed.insert(step.step_id.clone());
            }
        }

        self.finish(&run_id, run, true)
    }

    /// The message a step's agent receives: the initial message, the step's
    /// action, then upstream successes and failures in separate sections.
    fn build_message(&self, step: &A2AWorkflowStep, run: &SchedulerRun) -> AgentMessage {
        let mut content = format!("{}\n\nAction: {}", run.initial_message, step.action);

        let upstream: Vec<(&str, &StepOutcome)> = step
            .dependencies
            .iter()
            .filter_map(|d| run.outcomes.get(d).map(|o| (d.as_str(), o)))
            .collect();

        let successes: Vec<String> = upstream
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(id, o)| format!("- {}: {}", id, o.text()))
            .collect();
        if !successes.is_empty() {
            content.push_str("\n\nUpstream results:\n");
            content.push_str(&successes.join("\n"));
        }

        let failures: Vec<String> = upstream
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(id, o)| format!("- {}: {}", id, o.text()))
            .collect();
        if !failures.is_empty() {
            content.push_str("\n\nUpstream failures:\n");
            content.push_str(&failures.join("\n"));
        }

        let timeout_ms = step
            .config
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.config.default_step_timeout_ms);

        AgentMessage::new(content)
            .with_timeout(Duration::from_millis(timeout_ms))
            .with_metadata("stepId", json!(step.step_id))
            .with_metadata("action", json!(step.action))
    }

    async fn dispatch(&self, step: &A2AWorkflowStep, message: AgentMessage) -> (StepOutcome, u64) {
        let start = Instant::now();
        match self.transport.send_message(&step.agent_id, message).await {
            Ok(reply) => (
                StepOutcome::Success {
                    response: reply.message,
                },
                reply.response_time_ms,
            ),
            Err(e) => (
                StepOutcome::Failure {
                    error: e.to_string(),
                },
                start.elapsed().as_millis() as u64,
            ),
        }
    }

    fn record(
        &self,
        run_id: &str,
        run: &mut SchedulerRun,
        step: &A2AWorkflowStep,
        outcome: StepOutcome,
        response_time: u64,
        wave: usize,
    ) {
        let status = match &outcome {
            StepOutcome::Success { .. } => {
                debug!(step_id = %step.step_id, response_time, "Step completed");
                run.log(
                    ExecutionLogEntry::new(
                        LogEvent::StepComplete,
                        format!("Agent {} responded in {}ms", step.agent_id, response_time),
                    )
                    .for_step(&step.step_id, &step.agent_id),
                );
                self.emit(WorkflowEvent::StepCompleted {
                    run_id: run_id.to_string(),
                    step_id: step.step_id.clone(),
                    response_time_ms: response_time,
                });
                StepStatus::Success
            }
            StepOutcome::Failure { error } => {
                warn!(step_id = %step.step_id, error = %error, "Step failed");
                run.log(
                    ExecutionLogEntry::new(
                        LogEvent::StepError,
                        format!("Agent {} failed: {}", step.agent_id, error),
                    )
                    .for_step(&step.step_id, &step.agent_id),
                );
                self.emit(WorkflowEvent::StepFailed {
                    run_id: run_id.to_string(),
                    step_id: step.step_id.clone(),
                    error: error.clone(),
                });
                StepStatus::Error
            }
        };

        // Each step owns its own key, so writes within a wave never collide.
        run.context
            .set(output_key(&step.step_id), json!(outcome));
        run.outcomes.insert(step.step_id.clone(), outcome.clone());
        run.results.push(StepResult {
            step_id: step.step_id.clone(),
            agent_id: step.agent_id.clone(),
            outcome,
            status,
            response_time,
            wave,
        });
    }

    fn finish(&self, run_id: &str, mut run: SchedulerRun, success: bool) -> A2AExecutionReport {
        if success {
            let failed = run
                .results
                .iter()
                .filter(|r| r.status == StepStatus::Error)
                .count();
            run.log(ExecutionLogEntry::new(
                LogEvent::WorkflowComplete,
                format!(
                    "Workflow completed: {} succeeded, {} failed",
                    run.results.len() - failed,
                    failed
                ),
            ));
        }
        info!(run_id, success, steps = run.results.len(), "A2A workflow finished");
        self.emit(WorkflowEvent::SchedulerFinished {
            run_id: run_id.to_string(),
            success,
        });

        A2AExecutionReport {
            success,
            results: run.results,
            execution_log: run.log,
            waves: run.waves,
            context: run.context,
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Accumulated state of one scheduler run.
struct SchedulerRun {
    initial_message: String,
    outcomes: HashMap<String, StepOutcome>,
    results: Vec<StepResult>,
    log: Vec<ExecutionLogEntry>,
    waves: Vec<Vec<String>>,
    context: ExecutionContext,
}

impl SchedulerRun {
    fn new(initial_message: &str) -> Self {
        let mut context = ExecutionContext::new();
        context.set_str("initialMessage", initial_message);
        Self {
            initial_message: initial_message.to_string(),
            outcomes: HashMap::new(),
            results: Vec::new(),
            log: Vec::new(),
            waves: Vec::new(),
            context,
        }
    }

    fn log(&mut self, entry: ExecutionLogEntry) {
        self.log.push(entry);
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::graph::NodeStatus;

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub tokens_used: u64,
    pub cost: f64,
    pub error_count: u32,
    /// Wall-clock duration in milliseconds, set when the run finishes.
    pub duration: u64,
}

/// One captured node failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub node_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Ledger for one depth-first run of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_node: Option<String>,
    pub context: ExecutionContext,
    pub metrics: ExecutionMetrics,
    pub error_log: Vec<ErrorLogEntry>,
    /// Last known status of every node in the graph.
    pub node_states: BTreeMap<String, NodeStatus>,
    /// Node ids in the order they started executing, re-executions included.
    pub trace: Vec<String>,
}

impl WorkflowExecution {
    /// Start a new record in the `running` state.
    pub fn start(workflow_id: impl Into<String>, context: ExecutionContext) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            current_node: None,
            context,
            metrics: ExecutionMetrics::default(),
            error_log: Vec::new(),
            node_states: BTreeMap::new(),
            trace: Vec::new(),
        }
    }

    /// Record a node failure in the metrics and error log.
    pub fn record_error(&mut self, node_id: &str, error: impl Into<String>) {
        self.metrics.error_count += 1;
        self.error_log.push(ErrorLogEntry {
            node_id: node_id.to_string(),
            error: error.into(),
            timestamp: Utc::now(),
        });
    }

    /// Stamp the end time and duration and set the final status.
    pub fn finish(&mut self, status: ExecutionStatus) {
        let end = Utc::now();
        self.metrics.duration = (end - self.start_time).num_milliseconds().max(0) as u64;
        self.end_time = Some(end);
        self.status = status;
    }

    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node_states.get(node_id).copied().unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }
}

/// Result of executing one node.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub value: Value,
    pub tokens_used: u64,
    pub cost: f64,
}

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            tokens_used: 0,
            cost: 0.0,
        }
    }

    pub fn with_usage(mut self, tokens_used: u64, cost: f64) -> Self {
        self.tokens_used = tokens_used;
        self.cost = cost;
        self
    }
}

/// Outcome of a decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: bool,
    pub confidence: f64,
}

/// A message dispatched to an agent through the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub content: String,
    /// Deadline the transport must enforce, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timeout: None,
            metadata: Map::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An agent's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub message: String,
    pub response_time_ms: u64,
}

/// One agent invocation derived from an `agent` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2AWorkflowStep {
    pub step_id: String,
    pub agent_id: String,
    pub action: String,
    pub config: Map<String, Value>,
    pub dependencies: Vec<String>,
}

/// How a step ended. Dependents see successes and failures separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepOutcome {
    Success { response: String },
    Failure { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }

    /// The reply text on success, or the error text on failure.
    pub fn text(&self) -> &str {
        match self {
            StepOutcome::Success { response } => response,
            StepOutcome::Failure { error } => error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
}

/// Recorded result of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub agent_id: String,
    pub outcome: StepOutcome,
    pub status: StepStatus,
    pub response_time: u64,
    /// Zero-based index of the wave the step ran in.
    pub wave: usize,
}

impl StepResult {
    /// The response text as recorded in reports (error text on failure).
    pub fn response(&self) -> &str {
        self.outcome.text()
    }
}

/// Event kinds written to the scheduler's execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEvent {
    WorkflowStart,
    WaveStart,
    StepStart,
    StepComplete,
    StepError,
    CircularDependency,
    SchedulingError,
    Cancelled,
    WorkflowComplete,
}

impl std::fmt::Display for LogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogEvent::WorkflowStart => "WORKFLOW_START",
            LogEvent::WaveStart => "WAVE_START",
            LogEvent::StepStart => "STEP_START",
            LogEvent::StepComplete => "STEP_COMPLETE",
            LogEvent::StepError => "STEP_ERROR",
            LogEvent::CircularDependency => "CIRCULAR_DEPENDENCY",
            LogEvent::SchedulingError => "SCHEDULING_ERROR",
            LogEvent::Cancelled => "CANCELLED",
            LogEvent::WorkflowComplete => "WORKFLOW_COMPLETE",
        };
        f.write_str(s)
    }
}

/// A timestamped entry in the scheduler's execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: LogEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub message: String,
}

impl ExecutionLogEntry {
    pub fn new(event: LogEvent, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            step_id: None,
            agent_id: None,
            message: message.into(),
        }
    }

    pub fn for_step(mut self, step_id: &str, agent_id: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self.agent_id = Some(agent_id.to_string());
        self
    }
}

/// Output of a wave-parallel scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2AExecutionReport {
    pub success: bool,
    pub results: Vec<StepResult>,
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Step ids per wave, in execution order.
    pub waves: Vec<Vec<String>>,
    /// Initial message plus every step outcome under `{step_id}_output`.
    #[serde(default)]
    pub context: ExecutionContext,
}

impl A2AExecutionReport {
    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_lifecycle() {
        let mut exec = WorkflowExecution::start("wf-1", ExecutionContext::new());
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(!exec.is_finished());

        exec.record_error("p", "boom");
        assert_eq!(exec.metrics.error_count, 1);
        assert_eq!(exec.error_log[0].node_id, "p");

        exec.finish(ExecutionStatus::Completed);
        assert!(exec.end_time.is_some());
        assert!(exec.is_finished());
        assert_eq!(exec.node_status("never-ran"), NodeStatus::Pending);
    }

    #[test]
    fn test_step_outcome_text() {
        let ok = StepOutcome::Success {
            response: "done".into(),
        };
        let err = StepOutcome::Failure {
            error: "refused".into(),
        };
        assert!(ok.is_success());
        assert!(!err.is_success());
        assert_eq!(err.text(), "refused");
    }

    #[test]
    fn test_log_event_serialization() {
        let entry = ExecutionLogEntry::new(LogEvent::StepStart, "go").for_step("step-a", "a");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"], "STEP_START");
        assert_eq!(json["stepId"], "step-a");
        assert_eq!(LogEvent::CircularDependency.to_string(), "CIRCULAR_DEPENDENCY");
    }

    #[test]
    fn test_execution_serializes_camel_case() {
        let exec = WorkflowExecution::start("wf", ExecutionContext::new());
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["workflowId"], "wf");
        assert_eq!(json["status"], "running");
        assert!(json["metrics"].get("errorCount").is_some());
    }
}

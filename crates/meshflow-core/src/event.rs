use serde::Serialize;

use crate::types::{ExecutionId, ExecutionStatus};

/// Events emitted by both engines while a run is in progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Depth-first run started.
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: String,
    },
    /// Node moved to `running`.
    NodeStarted {
        execution_id: ExecutionId,
        node_id: String,
    },
    /// Node moved to `completed`.
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: String,
        elapsed_ms: u64,
    },
    /// Node moved to `failed`.
    NodeFailed {
        execution_id: ExecutionId,
        node_id: String,
        error: String,
    },
    /// An outgoing edge was not taken.
    EdgeSkipped {
        execution_id: ExecutionId,
        edge_id: String,
    },
    /// Depth-first run reached a final status.
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        duration_ms: u64,
    },
    /// Scheduler dispatched a wave.
    WaveStarted {
        run_id: String,
        wave: usize,
        step_ids: Vec<String>,
    },
    StepStarted {
        run_id: String,
        step_id: String,
        agent_id: String,
    },
    StepCompleted {
        run_id: String,
        step_id: String,
        response_time_ms: u64,
    },
    StepFailed {
        run_id: String,
        step_id: String,
        error: String,
    },
    /// Scheduler run ended.
    SchedulerFinished { run_id: String, success: bool },
}

impl WorkflowEvent {
    /// Identifier of the run the event belongs to.
    pub fn run_id(&self) -> String {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::NodeStarted { execution_id, .. }
            | WorkflowEvent::NodeCompleted { execution_id, .. }
            | WorkflowEvent::NodeFailed { execution_id, .. }
            | WorkflowEvent::EdgeSkipped { execution_id, .. }
            | WorkflowEvent::ExecutionFinished { execution_id, .. } => execution_id.0.clone(),
            WorkflowEvent::WaveStarted { run_id, .. }
            | WorkflowEvent::StepStarted { run_id, .. }
            | WorkflowEvent::StepCompleted { run_id, .. }
            | WorkflowEvent::StepFailed { run_id, .. }
            | WorkflowEvent::SchedulerFinished { run_id, .. } => run_id.clone(),
        }
    }

    /// Whether this event closes a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::ExecutionFinished { .. } | WorkflowEvent::SchedulerFinished { .. }
        )
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

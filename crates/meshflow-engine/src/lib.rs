pub mod graph;
pub mod run_log;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod transport;

pub use graph::{GraphExecutor, ValidationResult, WorkflowValidator};
pub use run_log::RunLogger;
pub use scheduler::A2AScheduler;
pub use simulation::{RandomDecisionPolicy, SimulatedNodeExecutor};
pub use store::{InMemoryExecutionStore, InMemoryWorkflowStore};
pub use transport::SimulatedTransport;

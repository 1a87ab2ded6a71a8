//! Simulated node execution.
//!
//! Nothing here performs inference. Each node type produces a synthetic
//! payload with the same shape a real integration would, so the traversal
//! engine can be exercised end to end. Swap in a real `NodeExecutor` to
//! call actual agents.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::debug;

use meshflow_core::config::SimulationConfig;
use meshflow_core::error::{MeshflowError, Result};
use meshflow_core::graph::{Node, NodeType};
use meshflow_core::traits::{DecisionPolicy, NodeExecutor};
use meshflow_core::types::{Decision, NodeOutput};
use meshflow_core::ExecutionContext;

/// Coin-flip decision policy.
///
/// Stands in for real policy evaluation: the decision is `true` with
/// probability one half and the confidence is uniform in `[0, 1)`.
pub struct RandomDecisionPolicy {
    rng: Mutex<StdRng>,
}

impl RandomDecisionPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sequence of decisions.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        match config.seed {
            Some(seed) => Self::seeded(seed),
            None => Self::new(),
        }
    }
}

impl Default for RandomDecisionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionPolicy for RandomDecisionPolicy {
    fn decide(&self, _context: &ExecutionContext) -> Decision {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Decision {
            decision: rng.gen::<f64>() > 0.5,
            confidence: rng.gen::<f64>(),
        }
    }
}

/// Type-dispatched synthetic executor.
///
/// Node config keys it understands:
/// - `fail`: `true` or an error message; the node fails with it.
/// - `latencyMs`: per-node delay, overriding `node_latency_ms`.
/// - `model`: model tag on processor and agent output.
/// - `decision`: forces a decision node's outcome (confidence 1.0).
/// - `service`: integration name.
/// - `agentId`: agent name on agent output.
pub struct SimulatedNodeExecutor {
    config: SimulationConfig,
    policy: Arc<dyn DecisionPolicy>,
}

impl SimulatedNodeExecutor {
    pub fn new(config: SimulationConfig, policy: Arc<dyn DecisionPolicy>) -> Self {
        Self { config, policy }
    }

    /// Executor with the random policy, seeded from config when set.
    pub fn from_config(config: SimulationConfig) -> Self {
        let policy = Arc::new(RandomDecisionPolicy::from_config(&config));
        Self::new(config, policy)
    }

    fn latency(&self, node: &Node) -> Duration {
        let ms = node
            .config
            .get("latencyMs")
            .and_then(Value::as_u64)
            .unwrap_or(self.config.node_latency_ms);
        Duration::from_millis(ms)
    }

    fn injected_failure(node: &Node) -> Option<String> {
        match node.config.get("fail")? {
            Value::Bool(true) => Some(format!("simulated failure in {}", node.id)),
            Value::String(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    fn model<'a>(&'a self, node: &'a Node) -> &'a str {
        node.config_str("model")
            .unwrap_or(&self.config.default_model)
    }

    fn usage(&self) -> (u64, f64) {
        let tokens = self.config.tokens_per_call;
        (tokens, self.config.cost_for(tokens))
    }

    fn run(&self, node: &Node, context: &ExecutionContext) -> NodeOutput {
        match node.node_type {
            NodeType::Trigger => NodeOutput::new(json!({
                "triggered": true,
                "timestamp": Utc::now().to_rfc3339(),
                "source": node.config_str("source").unwrap_or("manual"),
            })),
            NodeType::Processor => {
                let (tokens, cost) = self.usage();
                NodeOutput::new(json!({
                    "processed": true,
                    "model": self.model(node),
                    "result": format!("Processed by {}", node.display_name()),
                    "tokens": tokens,
                }))
                .with_usage(tokens, cost)
            }
            NodeType::Decision => {
                let decision = match node.config.get("decision").and_then(Value::as_bool) {
                    Some(forced) => Decision {
                        decision: forced,
                        confidence: 1.0,
                    },
                    None => self.policy.decide(context),
                };
                NodeOutput::new(json!({
                    "decision": decision.decision,
                    "confidence": decision.confidence,
                }))
            }
            NodeType::Integration => NodeOutput::new(json!({
                "integration": node.config_str("service").unwrap_or(node.display_name()),
                "status": "success",
                "data": {
                    "recordId": uuid::Uuid::new_v4().to_string(),
                    "syncedAt": Utc::now().to_rfc3339(),
                },
            })),
            NodeType::Terminal => NodeOutput::new(json!({
                "completed": true,
                "result": context.to_value(),
            })),
            NodeType::Agent => {
                let (tokens, cost) = self.usage();
                let agent_id = node.config_str("agentId").unwrap_or(&node.id);
                NodeOutput::new(json!({
                    "agentId": agent_id,
                    "response": format!("Agent {} handled {}", agent_id, node.display_name()),
                    "model": self.model(node),
                }))
                .with_usage(tokens, cost)
            }
        }
    }
}

impl NodeExecutor for SimulatedNodeExecutor {
    fn execute<'a>(
        &'a self,
        node: &'a Node,
        context: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let latency = self.latency(node);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if let Some(message) = Self::injected_failure(node) {
                debug!(node_id = %node.id, %message, "Injected node failure");
                return Err(MeshflowError::NodeExecution {
                    node: node.id.clone(),
                    message,
                });
            }

            Ok(self.run(node, context))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SimulatedNodeExecutor {
        SimulatedNodeExecutor::new(
            SimulationConfig::default(),
            Arc::new(RandomDecisionPolicy::seeded(7)),
        )
    }

    #[tokio::test]
    async fn test_trigger_output() {
        let out = executor()
            .execute(&Node::new("t", NodeType::Trigger), &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(out.value["triggered"], true);
        assert!(out.value["timestamp"].is_string());
        assert_eq!(out.tokens_used, 0);
    }

    #[tokio::test]
    async fn test_processor_reports_model_and_usage() {
        let node = Node::new("p", NodeType::Processor).with_config("model", json!("claude"));
        let out = executor()
            .execute(&node, &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(out.value["processed"], true);
        assert_eq!(out.value["model"], "claude");
        assert_eq!(out.tokens_used, 150);
        assert!((out.cost - 0.0003).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_terminal_returns_context() {
        let mut ctx = ExecutionContext::new();
        ctx.set("t_output", json!({"triggered": true}));
        let out = executor()
            .execute(&Node::new("e", NodeType::Terminal), &ctx)
            .await
            .unwrap();
        assert_eq!(out.value["completed"], true);
        assert_eq!(out.value["result"]["t_output"]["triggered"], true);
    }

    #[tokio::test]
    async fn test_forced_decision() {
        let node = Node::new("d", NodeType::Decision).with_config("decision", json!(false));
        let out = executor()
            .execute(&node, &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(out.value["decision"], false);
        assert_eq!(out.value["confidence"], 1.0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let node = Node::new("p", NodeType::Processor).with_config("fail", json!("boom"));
        let err = executor()
            .execute(&node, &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshflowError::NodeExecution { ref message, .. } if message == "boom"));
    }

    #[test]
    fn test_seeded_policy_is_reproducible() {
        let ctx = ExecutionContext::new();
        let a = RandomDecisionPolicy::seeded(42);
        let b = RandomDecisionPolicy::seeded(42);
        for _ in 0..5 {
            assert_eq!(a.decide(&ctx), b.decide(&ctx));
        }
        let d = a.decide(&ctx);
        assert!((0.0..1.0).contains(&d.confidence));
    }
}

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::debug;

use meshflow_core::config::SimulationConfig;
use meshflow_core::error::{MeshflowError, Result};
use meshflow_core::traits::AgentTransport;
use meshflow_core::types::{AgentMessage, AgentReply};

/// In-process agent transport that echoes an acknowledgement after a fixed
/// latency.
///
/// The message's `timeout` is enforced here, not by the scheduler.
pub struct SimulatedTransport {
    latency: Duration,
}

impl SimulatedTransport {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(Duration::from_millis(config.agent_latency_ms))
    }
}

impl AgentTransport for SimulatedTransport {
    fn send_message(
        &self,
        agent_id: &str,
        message: AgentMessage,
    ) -> BoxFuture<'_, Result<AgentReply>> {
        let agent_id = agent_id.to_string();
        Box::pin(async move {
            let start = Instant::now();
            let reply = async {
                tokio::time::sleep(self.latency).await;
                format!("[{}] acknowledged: {}", agent_id, first_line(&message.content))
            };

            let text = match message.timeout {
                Some(limit) => tokio::time::timeout(limit, reply).await.map_err(|_| {
                    MeshflowError::Timeout {
                        agent: agent_id.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }
                })?,
                None => reply.await,
            };

            let response_time_ms = start.elapsed().as_millis() as u64;
            debug!(agent = %agent_id, response_time_ms, "Simulated agent replied");
            Ok(AgentReply {
                message: text,
                response_time_ms,
            })
        })
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

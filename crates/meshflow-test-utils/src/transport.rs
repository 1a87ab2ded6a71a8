use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use meshflow_core::error::{MeshflowError, Result};
use meshflow_core::traits::AgentTransport;
use meshflow_core::types::{AgentMessage, AgentReply};

/// A message the mock received, with when it arrived and when it replied.
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub agent_id: String,
    pub message: AgentMessage,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Clone)]
enum Script {
    Reply(String),
    Fail(String),
}

/// Scripted agent transport.
///
/// Agents without a script reply `"{agent_id} ok"`. Every call is recorded
/// so tests can assert ordering and overlap.
#[derive(Default)]
pub struct MockTransport {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, agent_id: &str, text: &str) -> Self {
        self.scripts
            .insert(agent_id.to_string(), Script::Reply(text.to_string()));
        self
    }

    pub fn fail(mut self, agent_id: &str, error: &str) -> Self {
        self.scripts
            .insert(agent_id.to_string(), Script::Fail(error.to_string()));
        self
    }

    pub fn delay(mut self, agent_id: &str, delay: Duration) -> Self {
        self.delays.insert(agent_id.to_string(), delay);
        self
    }

    /// All calls in completion order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Agent ids in completion order.
    pub fn agents_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.agent_id).collect()
    }

    /// Messages delivered to `agent_id`.
    pub fn messages_for(&self, agent_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.agent_id == agent_id)
            .map(|c| c.message.content)
            .collect()
    }
}

impl AgentTransport for MockTransport {
    fn send_message(
        &self,
        agent_id: &str,
        message: AgentMessage,
    ) -> BoxFuture<'_, Result<AgentReply>> {
        let agent_id = agent_id.to_string();
        Box::pin(async move {
            let started = Instant::now();
            if let Some(delay) = self.delays.get(&agent_id) {
                tokio::time::sleep(*delay).await;
            }
            let finished = Instant::now();
            self.calls.lock().unwrap().push(TransportCall {
                agent_id: agent_id.clone(),
                message,
                started,
                finished,
            });

            match self.scripts.get(&agent_id).cloned() {
                Some(Script::Fail(error)) => Err(MeshflowError::Transport {
                    agent: agent_id,
                    message: error,
                }),
                Some(Script::Reply(text)) => Ok(AgentReply {
                    message: text,
                    response_time_ms: (finished - started).as_millis() as u64,
                }),
                None => Ok(AgentReply {
                    message: format!("{} ok", agent_id),
                    response_time_ms: (finished - started).as_millis() as u64,
                }),
            }
        })
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MeshflowError, Result};

/// Top-level Meshflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Depth-first traversal settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execute each node at most once per run, even when several taken
    /// paths reach it (default: false, every path re-executes it).
    #[serde(default)]
    pub dedupe_visits: bool,
}

/// Settings for the simulated node executor and agent transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Model reported by processor nodes that don't configure one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Tokens charged per processor or agent node.
    #[serde(default = "default_tokens_per_call")]
    pub tokens_per_call: u64,
    #[serde(default = "default_cost_per_1k_tokens")]
    pub cost_per_1k_tokens: f64,
    /// Artificial delay per node execution.
    #[serde(default)]
    pub node_latency_ms: u64,
    /// Latency of the simulated agent transport.
    #[serde(default = "default_agent_latency_ms")]
    pub agent_latency_ms: u64,
    /// Seed for the random decision policy; unseeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            tokens_per_call: default_tokens_per_call(),
            cost_per_1k_tokens: default_cost_per_1k_tokens(),
            node_latency_ms: 0,
            agent_latency_ms: default_agent_latency_ms(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Cost of `tokens` at the configured rate.
    pub fn cost_for(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }
}

fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_tokens_per_call() -> u64 {
    150
}
fn default_cost_per_1k_tokens() -> f64 {
    0.002
}
fn default_agent_latency_ms() -> u64 {
    50
}

/// Wave scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timeout handed to the transport for steps that don't set `timeout`.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber` filter directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Directory for JSONL run logs. Disabled when absent.
    #[serde(default)]
    pub dir: Option<String>,
    /// 1 = run summary, 2 = + node/step outcomes, 3 = + starts, skips, waves.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            dir: None,
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(PathBuf::from)
    }
}

fn default_log_filter() -> String {
    "meshflow=info,warn".to_string()
}
fn default_log_level() -> u8 {
    2
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| MeshflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| MeshflowError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

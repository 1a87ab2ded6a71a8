use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use meshflow_core::event::WorkflowEvent;

/// JSONL run logger.
///
/// Consumes `WorkflowEvent`s and writes one JSON object per line to
/// `{log_dir}/{run_id}/{timestamp}.jsonl`, one file per run. Lines are
/// flushed as they are written, so a crash never loses earlier entries.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Debug, Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1 = run summary, 2 = + node and step
    /// outcomes, 3 = + starts, skipped edges and waves.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Write entries until cancelled or until every sender is dropped and
    /// the channel drains.
    ///
    /// Subscribe before starting the run so no event is missed.
    pub async fn run(self, mut rx: Receiver<WorkflowEvent>, cancel: CancellationToken) {
        let mut files: HashMap<String, BufWriter<File>> = HashMap::new();
        info!(dir = %self.log_dir.display(), level = self.level, "RunLogger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let Some(entry) = self.event_to_entry(&event) else {
                                continue;
                            };
                            if let Err(e) = self.write(&mut files, &entry).await {
                                error!(error = %e, run_id = %entry.run_id, "Failed to write log entry");
                            }
                            // Run is over; close its file.
                            if event.is_terminal() {
                                if let Some(mut writer) = files.remove(&entry.run_id) {
                                    writer.flush().await.ok();
                                }
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        // Final flush
        for (_, mut writer) in files {
            writer.flush().await.ok();
        }
        debug!("RunLogger finished");
    }

    async fn write(
        &self,
        files: &mut HashMap<String, BufWriter<File>>,
        entry: &LogEntry,
    ) -> std::io::Result<()> {
        if !files.contains_key(&entry.run_id) {
            let writer = open_log(&self.log_dir, &entry.run_id).await?;
            files.insert(entry.run_id.clone(), writer);
        }
        let Some(writer) = files.get_mut(&entry.run_id) else {
            return Ok(());
        };

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }

    /// Convert an event to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &WorkflowEvent) -> Option<LogEntry> {
        let (min_level, event_type, detail) = match event {
            // L1: run summary
            WorkflowEvent::ExecutionStarted { workflow_id, .. } => (
                1,
                "execution_started",
                Some(serde_json::json!({ "workflow_id": workflow_id })),
            ),
            WorkflowEvent::ExecutionFinished {
                status,
                duration_ms,
                ..
            } => (
                1,
                "execution_finished",
                Some(serde_json::json!({ "status": status, "duration_ms": duration_ms })),
            ),
            WorkflowEvent::SchedulerFinished { success, .. } => (
                1,
                "scheduler_finished",
                Some(serde_json::json!({ "success": success })),
            ),

            // L2: outcomes
            WorkflowEvent::NodeCompleted {
                node_id,
                elapsed_ms,
                ..
            } => (
                2,
                "node_completed",
                Some(serde_json::json!({ "node_id": node_id, "elapsed_ms": elapsed_ms })),
            ),
            WorkflowEvent::NodeFailed { node_id, error, .. } => (
                2,
                "node_failed",
                Some(serde_json::json!({
                    "node_id": node_id,
                    "error": truncate_str(error, 500),
                })),
            ),
            WorkflowEvent::StepCompleted {
                step_id,
                response_time_ms,
                ..
            } => (
                2,
                "step_completed",
                Some(serde_json::json!({
                    "step_id": step_id,
                    "response_time_ms": response_time_ms,
                })),
            ),
            WorkflowEvent::StepFailed { step_id, error, .. } => (
                2,
                "step_failed",
                Some(serde_json::json!({
                    "step_id": step_id,
                    "error": truncate_str(error, 500),
                })),
            ),

            // L3: starts, skips, waves
            WorkflowEvent::NodeStarted { node_id, .. } => (
                3,
                "node_started",
                Some(serde_json::json!({ "node_id": node_id })),
            ),
            WorkflowEvent::EdgeSkipped { edge_id, .. } => (
                3,
                "edge_skipped",
                Some(serde_json::json!({ "edge_id": edge_id })),
            ),
            WorkflowEvent::WaveStarted { wave, step_ids, .. } => (
                3,
                "wave_started",
                Some(serde_json::json!({ "wave": wave, "step_ids": step_ids })),
            ),
            WorkflowEvent::StepStarted {
                step_id, agent_id, ..
            } => (
                3,
                "step_started",
                Some(serde_json::json!({ "step_id": step_id, "agent_id": agent_id })),
            ),
        };

        if self.level < min_level {
            return None;
        }

        Some(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id(),
            event_type,
            detail,
        })
    }
}

async fn open_log(log_dir: &Path, run_id: &str) -> std::io::Result<BufWriter<File>> {
    let run_dir = log_dir.join(run_id);
    tokio::fs::create_dir_all(&run_dir).await?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = run_dir.join(format!("{}.jsonl", timestamp));
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    debug!(path = %path.display(), "Opened run log");
    Ok(BufWriter::new(file))
}

/// Truncate a string for logging, on a char boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshflow_core::event::EventBus;
    use meshflow_core::types::{ExecutionId, ExecutionStatus};

    fn started(id: &str) -> WorkflowEvent {
        WorkflowEvent::ExecutionStarted {
            execution_id: ExecutionId::from_string(id),
            workflow_id: "wf".into(),
        }
    }

    #[test]
    fn test_jsonl_entry_format() {
        let entry = LogEntry {
            timestamp: "2026-02-24T12:00:00Z".to_string(),
            run_id: "run-1".to_string(),
            event_type: "execution_started",
            detail: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("execution_started"));
        assert!(json.contains("run-1"));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn test_event_level_filtering() {
        let skipped = WorkflowEvent::EdgeSkipped {
            execution_id: ExecutionId::from_string("x"),
            edge_id: "e1".into(),
        };
        let failed = WorkflowEvent::StepFailed {
            run_id: "r".into(),
            step_id: "step-a".into(),
            error: "boom".into(),
        };

        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        assert!(logger.event_to_entry(&started("x")).is_some());
        assert!(logger.event_to_entry(&failed).is_none());
        assert!(logger.event_to_entry(&skipped).is_none());

        let logger2 = RunLogger::new(PathBuf::from("/tmp"), 2);
        let entry = logger2.event_to_entry(&failed).unwrap();
        assert_eq!(entry.run_id, "r");
        assert_eq!(entry.detail.unwrap()["error"], "boom");
        assert!(logger2.event_to_entry(&skipped).is_none());

        let logger3 = RunLogger::new(PathBuf::from("/tmp"), 3);
        assert!(logger3.event_to_entry(&skipped).is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("short", 50), "short");
    }

    #[tokio::test]
    async fn test_writes_one_file_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(16);
        let rx = bus.subscribe();

        bus.publish(started("run-a"));
        bus.publish(WorkflowEvent::ExecutionFinished {
            execution_id: ExecutionId::from_string("run-a"),
            status: ExecutionStatus::Completed,
            duration_ms: 3,
        });
        drop(bus);

        RunLogger::new(dir.path().to_path_buf(), 2)
            .run(rx, CancellationToken::new())
            .await;

        let run_dir = dir.path().join("run-a");
        let mut entries = std::fs::read_dir(&run_dir).unwrap();
        let file = entries.next().unwrap().unwrap().path();
        let content = std::fs::read_to_string(file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event_type\":\"execution_started\""));
        assert!(lines[1].contains("\"status\":\"completed\""));
    }
}

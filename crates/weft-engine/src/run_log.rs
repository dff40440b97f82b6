use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weft_core::event::WorkflowEvent;
use weft_core::types::RunId;

/// JSONL run logger.
///
/// Consumes events for one run from an [`EventBus`](weft_core::EventBus)
/// receiver and appends one JSON object per line. Lines are flushed as they
/// are written, so a crashed run still leaves a readable log.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Logs are written to `{log_dir}/{run_id}/{timestamp}.jsonl`.
    /// `level`: 1=workflow summary, 2=node lifecycle, 3=node outputs.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Write events of `run_id` until its terminal event, cancellation, or the
    /// bus closing. Subscribe before the run starts so no event is missed.
    ///
    /// Returns the log file path, or `None` if it could not be opened.
    pub async fn run(
        self,
        mut rx: Receiver<WorkflowEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), %run_id, "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) if event.run_id() == &run_id => {
                            if let Some(entry) = self.event_to_entry(&event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }
                            if event.is_terminal() {
                                break;
                            }
                        }
                        Ok(_) => {}
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

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    /// Convert an event to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &WorkflowEvent) -> Option<LogEntry> {
        let detail = match event {
            WorkflowEvent::WorkflowStarted {
                workflow,
                node_count,
                ..
            } => Some(serde_json::json!({ "workflow": workflow, "node_count": node_count })),
            WorkflowEvent::WorkflowCompleted {
                status,
                total_cost,
                elapsed_ms,
                ..
            } => Some(serde_json::json!({
                "status": status,
                "total_cost": total_cost,
                "elapsed_ms": elapsed_ms,
            })),
            WorkflowEvent::WorkflowFailed { error, .. } => Some(serde_json::json!({ "error": error })),

            WorkflowEvent::NodeStarted { kind, .. } if self.level >= 2 => {
                Some(serde_json::json!({ "kind": kind }))
            }
            WorkflowEvent::NodeFailed { error, .. } if self.level >= 2 => {
                Some(serde_json::json!({ "error": error }))
            }
            WorkflowEvent::NodeCompleted { output, metrics, .. } if self.level >= 2 => {
                let mut detail = serde_json::json!({
                    "elapsed_ms": metrics.execution_time_ms,
                    "cost": metrics.cost,
                    "tokens_used": metrics.tokens_used,
                });
                if self.level >= 3 {
                    detail["output"] = serde_json::Value::String(truncate_json(output, 500));
                }
                Some(detail)
            }

            _ => return None,
        };

        Some(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().0.clone(),
            event_type: event.phase().to_string(),
            node_id: event.node_id().map(String::from),
            detail,
        })
    }
}

/// Truncate a JSON value for logging.
fn truncate_json(value: &serde_json::Value, max_len: usize) -> String {
    let s = value.to_string();
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

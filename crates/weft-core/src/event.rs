use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::types::{NodeMetrics, RunId, WorkflowStatus};

/// Lifecycle notification emitted by the orchestrator, in execution order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Validation passed and nodes are about to run.
    WorkflowStarted {
        run_id: RunId,
        workflow: String,
        node_count: usize,
    },
    /// A node was marked running.
    NodeStarted {
        run_id: RunId,
        node_id: String,
        kind: String,
    },
    /// A node finished and its output was recorded.
    NodeCompleted {
        run_id: RunId,
        node_id: String,
        output: Value,
        metrics: NodeMetrics,
    },
    /// A node failed; its error was recorded.
    NodeFailed {
        run_id: RunId,
        node_id: String,
        error: String,
    },
    /// The run reached the end (possibly with node errors).
    WorkflowCompleted {
        run_id: RunId,
        status: WorkflowStatus,
        total_cost: f64,
        elapsed_ms: u64,
    },
    /// The run failed validation, was aborted, or was cancelled.
    WorkflowFailed { run_id: RunId, error: String },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::WorkflowStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::WorkflowFailed { run_id, .. } => run_id,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Short phase label (`node_start`, `node_complete`, ...).
    pub fn phase(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_start",
            Self::NodeStarted { .. } => "node_start",
            Self::NodeCompleted { .. } => "node_complete",
            Self::NodeFailed { .. } => "node_error",
            Self::WorkflowCompleted { .. } => "workflow_complete",
            Self::WorkflowFailed { .. } => "workflow_error",
        }
    }

    /// Whether this is the last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. }
        )
    }
}

/// Receiver of lifecycle events. Called synchronously from the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &WorkflowEvent);
}

impl<F> EventSink for F
where
    F: Fn(&WorkflowEvent) + Send + Sync,
{
    fn emit(&self, event: &WorkflowEvent) {
        self(event)
    }
}

/// Adapt a `(node_id, phase, data)` progress callback into a sink.
///
/// Only node-level events are forwarded. `data` is the output for
/// `node_complete`, the error string for `node_error`, and the node kind for
/// `node_start`.
pub fn progress_sink<F>(callback: F) -> impl EventSink
where
    F: Fn(&str, &str, &Value) + Send + Sync,
{
    move |event: &WorkflowEvent| {
        let data = match event {
            WorkflowEvent::NodeStarted { kind, .. } => Value::String(kind.clone()),
            WorkflowEvent::NodeCompleted { output, .. } => output.clone(),
            WorkflowEvent::NodeFailed { error, .. } => Value::String(error.clone()),
            _ => return,
        };
        if let Some(node_id) = event.node_id() {
            callback(node_id, event.phase(), &data);
        }
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

impl EventSink for EventBus {
    fn emit(&self, event: &WorkflowEvent) {
        self.publish(event.clone());
    }
}

/// Mirrors lifecycle events into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::WorkflowStarted {
                run_id,
                workflow,
                node_count,
            } => info!(%run_id, %workflow, node_count, "Workflow started"),
            WorkflowEvent::NodeStarted {
                run_id,
                node_id,
                kind,
            } => debug!(%run_id, %node_id, %kind, "Node started"),
            WorkflowEvent::NodeCompleted {
                run_id,
                node_id,
                metrics,
                ..
            } => info!(
                %run_id,
                %node_id,
                elapsed_ms = metrics.execution_time_ms,
                cost = metrics.cost,
                "Node completed"
            ),
            WorkflowEvent::NodeFailed {
                run_id,
                node_id,
                error,
            } => warn!(%run_id, %node_id, %error, "Node failed"),
            WorkflowEvent::WorkflowCompleted {
                run_id,
                status,
                total_cost,
                elapsed_ms,
            } => info!(%run_id, %status, total_cost, elapsed_ms, "Workflow finished"),
            WorkflowEvent::WorkflowFailed { run_id, error } => {
                warn!(%run_id, %error, "Workflow failed")
            }
        }
    }
}

//! Sequential workflow runner.
//!
//! One run walks the topological order node by node. Node failures are
//! recorded and the walk continues, except for failing input nodes and
//! cancellation, which abort. Nothing escapes `execute` as an error or a panic.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weft_core::config::{EngineConfig, WeftConfig};
use weft_core::error::WeftError;
use weft_core::event::{EventSink, TracingSink, WorkflowEvent};
use weft_core::types::{
    elapsed_ms, Node, NodeMetrics, NodeResult, NodeStatus, RunId, StatusTable, Workflow,
    WorkflowResult, WorkflowStatus,
};
use weft_llm::{PricingTable, ProviderRegistry};
use weft_sandbox::SandboxExecutor;

use crate::nodes::{ExecutorTable, NodeContext, NodeExecutor, NodeOutput};
use crate::scheduler;

/// Per-run knobs for [`WorkflowExecutor::execute_with`].
#[derive(Clone)]
pub struct RunOptions {
    pub run_id: Option<RunId>,
    pub sink: Option<Arc<dyn EventSink>>,
    pub cancel: CancellationToken,
    /// Shared status table to observe progress from outside the run.
    pub statuses: Option<Arc<StatusTable>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: None,
            sink: None,
            cancel: CancellationToken::new(),
            statuses: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_statuses(mut self, statuses: Arc<StatusTable>) -> Self {
        self.statuses = Some(statuses);
        self
    }
}

/// Fans each event out to the tracing mirror and the caller's sink.
struct Emitter<'a> {
    sink: Option<&'a dyn EventSink>,
}

impl Emitter<'_> {
    fn emit(&self, event: WorkflowEvent) {
        TracingSink.emit(&event);
        if let Some(sink) = self.sink {
            sink.emit(&event);
        }
    }
}

/// Runs workflows against a provider registry and a sandbox.
///
/// Cheap to share: every run owns its own state, so one executor may run
/// many workflows concurrently.
pub struct WorkflowExecutor {
    providers: Arc<ProviderRegistry>,
    sandbox: Arc<SandboxExecutor>,
    pricing: Arc<PricingTable>,
    engine: EngineConfig,
    overrides: Vec<Arc<dyn NodeExecutor>>,
    executors: ExecutorTable,
    sink: Option<Arc<dyn EventSink>>,
}

impl WorkflowExecutor {
    pub fn new(providers: Arc<ProviderRegistry>, sandbox: Arc<SandboxExecutor>) -> Self {
        let mut executor = Self {
            providers,
            sandbox,
            pricing: Arc::new(PricingTable::builtin()),
            engine: EngineConfig::default(),
            overrides: Vec::new(),
            executors: ExecutorTable::new(),
            sink: None,
        };
        executor.rebuild();
        executor
    }

    /// Providers, sandbox, pricing and engine settings from config.
    pub fn from_config(config: &WeftConfig) -> Self {
        Self::new(
            Arc::new(ProviderRegistry::from_config(config)),
            Arc::new(SandboxExecutor::new(config.sandbox.clone())),
        )
        .with_pricing(PricingTable::with_overrides(&config.pricing))
        .with_engine_config(config.engine.clone())
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Arc::new(pricing);
        self.rebuild();
        self
    }

    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self.rebuild();
        self
    }

    /// Replace the executor for one node kind.
    pub fn with_executor(mut self, executor: impl NodeExecutor) -> Self {
        self.overrides.push(Arc::new(executor));
        self.rebuild();
        self
    }

    /// Sink used for runs that do not bring their own.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn sandbox(&self) -> &Arc<SandboxExecutor> {
        &self.sandbox
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    fn rebuild(&mut self) {
        let mut table = ExecutorTable::standard(
            self.providers.clone(),
            self.sandbox.clone(),
            self.pricing.clone(),
            &self.engine,
        );
        for executor in &self.overrides {
            table.register_arc(executor.clone());
        }
        self.executors = table;
    }

    /// Run a workflow with default options.
    pub async fn execute(&self, workflow: &Workflow, initial_input: Value) -> WorkflowResult {
        self.execute_with(workflow, initial_input, RunOptions::default())
            .await
    }

    /// Run a workflow. Always produces a result; failures are reported in it.
    pub async fn execute_with(
        &self,
        workflow: &Workflow,
        initial_input: Value,
        options: RunOptions,
    ) -> WorkflowResult {
        let run_id = options.run_id.clone().unwrap_or_default();
        let started_at = Utc::now();
        let sink = options.sink.clone().or_else(|| self.sink.clone());
        let emitter = Emitter {
            sink: sink.as_deref(),
        };

        let run = self.run(workflow, initial_input, &run_id, &options, &emitter);
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = format!("Internal error: {}", panic_message(&*panic));
                error!(%run_id, workflow = %workflow.name, error = %message, "Workflow run panicked");
                emitter.emit(WorkflowEvent::WorkflowFailed {
                    run_id: run_id.clone(),
                    error: message.clone(),
                });
                let mut result = WorkflowResult::failed(run_id, &workflow.name, started_at, message);
                if let Some(statuses) = &options.statuses {
                    result.node_statuses = statuses.snapshot();
                }
                result
            }
        }
    }

    async fn run(
        &self,
        workflow: &Workflow,
        initial_input: Value,
        run_id: &RunId,
        options: &RunOptions,
        emitter: &Emitter<'_>,
    ) -> WorkflowResult {
        let started_at = Utc::now();

        // Every run opens with workflow_start, including one that fails validation
        emitter.emit(WorkflowEvent::WorkflowStarted {
            run_id: run_id.clone(),
            workflow: workflow.name.clone(),
            node_count: workflow.nodes.len(),
        });

        let order = match scheduler::execution_order(workflow) {
            Ok(order) => order,
            Err(e) => {
                let message = e.to_string();
                emitter.emit(WorkflowEvent::WorkflowFailed {
                    run_id: run_id.clone(),
                    error: message.clone(),
                });
                return WorkflowResult::failed(run_id.clone(), &workflow.name, started_at, message);
            }
        };

        let statuses = options
            .statuses
            .clone()
            .unwrap_or_else(|| Arc::new(StatusTable::new()));
        statuses.reset(workflow);

        let ctx = NodeContext {
            run_id: run_id.clone(),
            initial_input,
            timeout: Duration::from_millis(
                workflow.timeout_ms.unwrap_or(self.engine.node_timeout_ms),
            ),
            cancel: options.cancel.clone(),
        };

        let mut results: BTreeMap<String, NodeResult> = BTreeMap::new();
        let mut aborted: Option<String> = None;

        for node in order {
            if ctx.cancel.is_cancelled() {
                aborted = Some(WeftError::Cancelled.to_string());
                break;
            }

            let input = resolve_input(workflow, node, &results, &ctx.initial_input);
            statuses.set(&node.id, NodeStatus::Running);
            emitter.emit(WorkflowEvent::NodeStarted {
                run_id: run_id.clone(),
                node_id: node.id.clone(),
                kind: node.kind.type_name().to_string(),
            });

            let node_start = Utc::now();
            let outcome = self.executors.dispatch(node, input.clone(), &ctx).await;
            let node_end = Utc::now();

            match outcome {
                Ok(out) => {
                    let metrics = metrics_for(&out, &input, node_start, node_end);
                    debug!(node_id = %node.id, elapsed_ms = metrics.execution_time_ms, "Node output recorded");
                    emitter.emit(WorkflowEvent::NodeCompleted {
                        run_id: run_id.clone(),
                        node_id: node.id.clone(),
                        output: out.output.clone(),
                        metrics: metrics.clone(),
                    });
                    results.insert(
                        node.id.clone(),
                        NodeResult {
                            node_id: node.id.clone(),
                            kind: node.kind.type_name().to_string(),
                            output: out.output,
                            error: None,
                            metrics,
                        },
                    );
                    statuses.set(&node.id, NodeStatus::Completed);
                }
                Err(e) => {
                    let message = e.to_string();
                    results.insert(
                        node.id.clone(),
                        NodeResult {
                            node_id: node.id.clone(),
                            kind: node.kind.type_name().to_string(),
                            output: Value::Null,
                            error: Some(message.clone()),
                            metrics: NodeMetrics::zeroed(node_start, node_end),
                        },
                    );
                    statuses.set(&node.id, NodeStatus::Error);
                    emitter.emit(WorkflowEvent::NodeFailed {
                        run_id: run_id.clone(),
                        node_id: node.id.clone(),
                        error: message.clone(),
                    });

                    if matches!(e, WeftError::Cancelled) {
                        aborted = Some(message);
                        break;
                    }
                    if node.kind.is_input() && self.engine.abort_on_input_failure {
                        error!(node_id = %node.id, error = %message, "Input node failed, aborting run");
                        aborted = Some(format!("Input node {} failed: {}", node.id, message));
                        break;
                    }
                }
            }
        }

        let finished_at = Utc::now();
        let total_cost: f64 = results.values().map(|r| r.metrics.cost).sum();
        let total_execution_time_ms = elapsed_ms(started_at, finished_at);
        let status = if aborted.is_some() {
            WorkflowStatus::Failed
        } else if results.values().any(|r| r.is_error()) {
            WorkflowStatus::Partial
        } else {
            WorkflowStatus::Completed
        };

        match &aborted {
            Some(error) => emitter.emit(WorkflowEvent::WorkflowFailed {
                run_id: run_id.clone(),
                error: error.clone(),
            }),
            None => emitter.emit(WorkflowEvent::WorkflowCompleted {
                run_id: run_id.clone(),
                status,
                total_cost,
                elapsed_ms: total_execution_time_ms,
            }),
        }
        info!(%run_id, workflow = %workflow.name, %status, nodes = results.len(), "Run finished");

        WorkflowResult {
            run_id: run_id.clone(),
            workflow: workflow.name.clone(),
            status,
            results,
            node_statuses: statuses.snapshot(),
            started_at,
            finished_at,
            total_execution_time_ms,
            total_cost,
            error: aborted,
        }
    }
}

/// Input handed to a node: the initial input for root input nodes, the single
/// upstream output, or an array of upstream outputs in edge declaration order.
pub fn resolve_input(
    workflow: &Workflow,
    node: &Node,
    results: &BTreeMap<String, NodeResult>,
    initial_input: &Value,
) -> Value {
    let output_of = |id: &str| {
        results
            .get(id)
            .map(|r| r.output.clone())
            .unwrap_or(Value::Null)
    };

    match workflow.incoming(&node.id).as_slice() {
        [] if node.kind.is_input() => initial_input.clone(),
        [] => Value::Null,
        [edge] => output_of(&edge.source),
        edges => Value::Array(edges.iter().map(|e| output_of(&e.source)).collect()),
    }
}

fn metrics_for(
    out: &NodeOutput,
    input: &Value,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
) -> NodeMetrics {
    let memory_bytes = out
        .memory_bytes
        .unwrap_or_else(|| (json_len(input) + json_len(&out.output)) as u64);
    NodeMetrics {
        started_at,
        finished_at,
        execution_time_ms: elapsed_ms(started_at, finished_at),
        memory_bytes,
        cost: out.cost,
        tokens_used: out.tokens_used,
        prompt_tokens: out.prompt_tokens,
        completion_tokens: out.completion_tokens,
    }
}

fn json_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Per-kind node execution strategies and the dispatch table.

pub mod input;
pub mod llm;
pub mod npm;
pub mod output;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::types::{Node, RunId};
use weft_llm::{PricingTable, ProviderRegistry};
use weft_sandbox::SandboxExecutor;

pub use input::InputExecutor;
pub use llm::LlmExecutor;
pub use npm::NpmExecutor;
pub use output::OutputExecutor;

/// Run-scoped data available to every node execution.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub run_id: RunId,
    pub initial_input: Value,
    /// Timeout budget for one dispatch.
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(initial_input: Value, timeout: Duration) -> Self {
        Self {
            run_id: RunId::new(),
            initial_input,
            timeout,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a node produced, before the orchestrator stamps timing on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub output: Value,
    pub cost: f64,
    pub tokens_used: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Measured memory, when the executor knows better than a payload estimate.
    pub memory_bytes: Option<u64>,
}

impl NodeOutput {
    /// A free output with no token accounting.
    pub fn value(output: Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }
}

/// Execution strategy for one node kind.
pub trait NodeExecutor: Send + Sync + 'static {
    /// Node type name this executor handles (`input`, `llm`, ...).
    fn kind(&self) -> &'static str;

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: Value,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutput>>;
}

/// Dispatch table from node kind to executor.
#[derive(Default, Clone)]
pub struct ExecutorTable {
    executors: HashMap<&'static str, Arc<dyn NodeExecutor>>,
}

impl ExecutorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the four standard executors.
    pub fn standard(
        providers: Arc<ProviderRegistry>,
        sandbox: Arc<SandboxExecutor>,
        pricing: Arc<PricingTable>,
        engine: &EngineConfig,
    ) -> Self {
        let mut table = Self::new();
        table.register(InputExecutor);
        table.register(OutputExecutor);
        table.register(LlmExecutor::new(providers, pricing).with_defaults(
            engine.default_temperature,
            engine.default_max_tokens,
        ));
        table.register(NpmExecutor::new(sandbox));
        table
    }

    /// Register an executor, replacing any existing one for the same kind.
    pub fn register(&mut self, executor: impl NodeExecutor) {
        self.register_arc(Arc::new(executor));
    }

    pub fn register_arc(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Execute a node through its kind's executor, bounded by the context
    /// timeout and cancellation token.
    pub async fn dispatch(&self, node: &Node, input: Value, ctx: &NodeContext) -> Result<NodeOutput> {
        let kind = node.kind.type_name();
        let executor = self
            .get(kind)
            .ok_or_else(|| WeftError::Shape(format!("no executor for node type '{}'", kind)))?;

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(WeftError::Cancelled),
            result = tokio::time::timeout(ctx.timeout, executor.execute(node, input, ctx)) => {
                match result {
                    Ok(output) => output,
                    Err(_) => Err(WeftError::NodeExecution {
                        node: node.id.clone(),
                        message: format!("timed out after {}ms", ctx.timeout.as_millis()),
                    }),
                }
            }
        }
    }
}

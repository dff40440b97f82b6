//! Mocks and fixtures shared by weft's test suites.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tempfile::TempDir;

use weft_core::config::{SandboxConfig, SandboxMode, WeftConfig};
use weft_core::error::{Result, WeftError};
use weft_core::event::{EventSink, WorkflowEvent};
use weft_core::traits::ProviderAdapter;
use weft_core::types::{Completion, CompletionRequest, Node, TokenUsage, Workflow};

// ── Event capture ───────────────────────────────────────────────

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `phase` of every event, in order.
    pub fn phases(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.phase()).collect()
    }

    /// `node_id:phase` for node-level events, in order.
    pub fn node_phases(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.node_id().map(|id| format!("{}:{}", id, e.phase())))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &WorkflowEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

// ── Provider mocks ──────────────────────────────────────────────

/// Adapter returning a fixed completion and recording every request.
pub struct ScriptedProvider {
    name: String,
    content: String,
    usage: TokenUsage,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
            },
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests().pop()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Completion {
                content: self.content.clone(),
                usage: self.usage,
            })
        })
    }
}

/// Adapter whose every call fails with a provider error.
pub struct FailingProvider {
    name: String,
    message: String,
}

impl FailingProvider {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl ProviderAdapter for FailingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, _request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        Box::pin(async move { Err(WeftError::ProviderCall(self.message.clone())) })
    }
}

/// Adapter that panics when called.
pub struct PanickingProvider;

impl ProviderAdapter for PanickingProvider {
    fn name(&self) -> &str {
        "panicky"
    }

    fn call(&self, _request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        panic!("adapter exploded")
    }
}

// ── Fixtures ────────────────────────────────────────────────────

/// Sandbox config that never spawns a worker process.
pub fn inline_sandbox_config() -> SandboxConfig {
    SandboxConfig {
        mode: SandboxMode::Inline,
        ..Default::default()
    }
}

/// `in -> double (lodash) -> out`.
pub fn doubling_workflow() -> Workflow {
    Workflow::new("double")
        .with_node(Node::input("in"))
        .with_node(Node::npm("double", "lodash").with_code("return input.map(x => x * 2);"))
        .with_node(Node::output("out"))
        .with_edge("in", "double")
        .with_edge("double", "out")
}

/// `in -> llm (provider "acme") -> out`.
pub fn llm_workflow(provider: &str) -> Workflow {
    Workflow::new("ask")
        .with_node(Node::input("in"))
        .with_node(Node::llm("llm", provider, "acme-small"))
        .with_node(Node::output("out"))
        .with_edge("in", "llm")
        .with_edge("llm", "out")
}

/// `a -> b -> a`.
pub fn cyclic_workflow() -> Workflow {
    Workflow::new("loop")
        .with_node(Node::npm("a", "lodash"))
        .with_node(Node::npm("b", "lodash"))
        .with_edge("a", "b")
        .with_edge("b", "a")
}

/// `in -> boom (throws) -> out`.
pub fn throwing_workflow() -> Workflow {
    Workflow::new("throws")
        .with_node(Node::input("in"))
        .with_node(Node::npm("boom", "lodash").with_code("throw new Error('kaboom');"))
        .with_node(Node::output("out"))
        .with_edge("in", "boom")
        .with_edge("boom", "out")
}

/// Two branches joined by one output node; edges into `out` declared `right`
/// first.
pub fn fan_in_workflow() -> Workflow {
    Workflow::new("fan-in")
        .with_node(Node::input("in"))
        .with_node(Node::npm("left", "lodash").with_code("return 'L';"))
        .with_node(Node::npm("right", "lodash").with_code("return 'R';"))
        .with_node(Node::output("out"))
        .with_edge("in", "left")
        .with_edge("in", "right")
        .with_edge("right", "out")
        .with_edge("left", "out")
}

/// A small input payload used across tests.
pub fn sample_input() -> serde_json::Value {
    json!([1, 2, 3])
}

// ── Config files ────────────────────────────────────────────────

/// Write `content` to `weft.toml` in a fresh temp dir.
pub fn write_config(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("weft.toml");
    std::fs::write(&path, content).expect("write config");
    (dir, path)
}

/// Serialize a config and write it as `weft.toml` in a fresh temp dir.
pub fn write_weft_config(config: &WeftConfig) -> (TempDir, PathBuf) {
    let content = toml::to_string(config).expect("serialize config");
    write_config(&content)
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow definition ─────────────────────────────────────────

/// What a node does, together with the payload specific to that kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Entry point; emits the run's initial input.
    Input,
    /// Sink; passes its resolved input through.
    Output,
    /// Remote model call through a registered provider.
    Llm { provider: String, model: String },
    /// Package snippet executed in the sandbox.
    Npm { package: String },
    /// A `type` the engine does not recognize. Rejected by validation.
    Unknown(String),
}

impl NodeKind {
    /// Name used on the wire and as the executor dispatch key.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Llm { .. } => "llm",
            Self::Npm { .. } => "npm",
            Self::Unknown(name) => name,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input)
    }
}

/// Free-form per-node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, alias = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Snippet body for package nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Fallback value for input nodes when the run has no initial input.
    #[serde(default, alias = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Anything else the caller attached.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A node in the workflow graph.
///
/// Serialized as a flat object: `{"id", "type", "name", "provider", "model",
/// "package", "config"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
    pub config: NodeConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            config: NodeConfig::default(),
        }
    }

    pub fn input(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Input)
    }

    pub fn output(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Output)
    }

    pub fn llm(id: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Llm {
                provider: provider.into(),
                model: model.into(),
            },
        )
    }

    pub fn npm(id: impl Into<String>, package: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Npm {
                package: package.into(),
            },
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.config.code = Some(code.into());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.config.default_value = Some(value);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    /// Display label: the name if set, otherwise the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package: Option<String>,
    #[serde(default)]
    config: NodeConfig,
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        let kind = match raw.kind.to_ascii_lowercase().as_str() {
            "input" => NodeKind::Input,
            "output" => NodeKind::Output,
            "llm" | "model" | "model-call" => NodeKind::Llm {
                provider: raw.provider.unwrap_or_default(),
                model: raw.model.unwrap_or_default(),
            },
            "npm" | "package" | "package-call" => NodeKind::Npm {
                package: raw.package.unwrap_or_default(),
            },
            _ => NodeKind::Unknown(raw.kind),
        };
        Self {
            id: raw.id,
            name: raw.name,
            kind,
            config: raw.config,
        }
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let kind = node.kind.type_name().to_string();
        let (provider, model, package) = match node.kind {
            NodeKind::Llm { provider, model } => (Some(provider), Some(model), None),
            NodeKind::Npm { package } => (None, None, Some(package)),
            _ => (None, None, None),
        };
        Self {
            id: node.id,
            kind,
            name: node.name,
            provider,
            model,
            package,
            config: node.config,
        }
    }
}

/// A directed dependency: `target` consumes the output of `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A workflow definition. Immutable while it runs; reusable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Per-node timeout budget for this workflow, overriding the engine default.
    #[serde(default, alias = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Incoming edges of a node, in declaration order.
    pub fn incoming(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == id).collect()
    }
}

// ── Run state ───────────────────────────────────────────────────

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Ready,
    Running,
    Completed,
    Error,
}

/// Per-run node status side table.
///
/// Owned by a single run; wrap it in an `Arc` to poll progress from outside.
#[derive(Debug, Default)]
pub struct StatusTable {
    inner: RwLock<HashMap<String, NodeStatus>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every node of a workflow to `Ready`.
    pub fn reset(&self, workflow: &Workflow) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
        for node in &workflow.nodes {
            map.insert(node.id.clone(), NodeStatus::Ready);
        }
    }

    pub fn set(&self, node_id: &str, status: NodeStatus) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.to_string(), status);
    }

    pub fn get(&self, node_id: &str) -> Option<NodeStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

// ── Results ─────────────────────────────────────────────────────

/// Timing, memory and cost accounting for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub memory_bytes: u64,
    pub cost: f64,
    pub tokens_used: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl NodeMetrics {
    /// Metrics for a node that produced nothing (failed).
    pub fn zeroed(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at,
            execution_time_ms: 0,
            memory_bytes: 0,
            cost: 0.0,
            tokens_used: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

/// The recorded outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    /// Node type name (`input`, `output`, `llm`, `npm`).
    pub kind: String,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: NodeMetrics,
}

impl NodeResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Every node succeeded.
    Completed,
    /// The run never started, was aborted, or was cancelled.
    Failed,
    /// At least one node errored but the run went on to the end.
    Partial,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: RunId,
    pub workflow: String,
    pub status: WorkflowStatus,
    pub results: BTreeMap<String, NodeResult>,
    #[serde(default)]
    pub node_statuses: BTreeMap<String, NodeStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_execution_time_ms: u64,
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// A run that failed before (or instead of) executing nodes.
    pub fn failed(
        run_id: RunId,
        workflow: impl Into<String>,
        started_at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            run_id,
            workflow: workflow.into(),
            status: WorkflowStatus::Failed,
            results: BTreeMap::new(),
            node_statuses: BTreeMap::new(),
            started_at,
            finished_at,
            total_execution_time_ms: elapsed_ms(started_at, finished_at),
            total_cost: 0.0,
            error: Some(message.into()),
        }
    }

    /// Output recorded for a node, if it ran.
    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id).map(|r| &r.output)
    }

    /// Ids of nodes that recorded an error.
    pub fn errored_nodes(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.is_error())
            .map(|r| r.node_id.as_str())
            .collect()
    }
}

/// Milliseconds between two timestamps, clamped at zero.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

// ── Provider calls ──────────────────────────────────────────────

/// A single prompt sent to a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model_id: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A provider's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

//! Post-run roll-ups and tuning suggestions.
//!
//! Everything here is a pure function of a [`WorkflowResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::types::{RunId, WorkflowResult, WorkflowStatus};

/// USD per second of wall-clock node time.
pub const COMPUTE_COST_PER_SECOND: f64 = 0.0001;
/// USD per GB of node output payload.
pub const STORAGE_COST_PER_GB: f64 = 0.023;
/// USD per GB moved to and from model providers.
pub const NETWORK_COST_PER_GB: f64 = 0.09;

pub const SLOW_NODE_MS: u64 = 5_000;
pub const HIGH_ERROR_RATE: f64 = 0.10;
pub const HIGH_LLM_COST: f64 = 0.10;
pub const HIGH_MEMORY_BYTES: u64 = 50 * 1024 * 1024;
pub const LOW_THROUGHPUT_NODES_PER_SEC: f64 = 0.5;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAnalytics {
    pub run_id: RunId,
    pub workflow: String,
    pub status: WorkflowStatus,
    pub performance: PerformanceMetrics,
    pub cost: CostBreakdown,
    pub quality: QualityMetrics,
    pub nodes: Vec<NodeBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_execution_time_ms: u64,
    pub node_time_ms: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: u64,
    pub slowest_node: Option<String>,
    pub throughput_nodes_per_sec: f64,
    pub total_memory_bytes: u64,
    pub peak_memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub llm: f64,
    pub compute: f64,
    pub storage: f64,
    pub network: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_nodes: usize,
    pub failed_nodes: usize,
    pub error_rate: f64,
    pub completed: bool,
    pub average_llm_output_length: f64,
}

/// One row per executed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBreakdown {
    pub node_id: String,
    pub kind: String,
    pub execution_time_ms: u64,
    pub memory_bytes: u64,
    pub cost: f64,
    pub tokens_used: u64,
    pub output_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn payload_bytes(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        other => serde_json::to_vec(other).map(|v| v.len() as u64).unwrap_or(0),
    }
}

fn output_length(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

/// Summarize a finished run.
pub fn summarize(result: &WorkflowResult) -> WorkflowAnalytics {
    let nodes: Vec<NodeBreakdown> = result
        .results
        .values()
        .map(|r| NodeBreakdown {
            node_id: r.node_id.clone(),
            kind: r.kind.clone(),
            execution_time_ms: r.metrics.execution_time_ms,
            memory_bytes: r.metrics.memory_bytes,
            cost: r.metrics.cost,
            tokens_used: r.metrics.tokens_used,
            output_bytes: payload_bytes(&r.output),
            error: r.error.clone(),
        })
        .collect();

    let total_nodes = nodes.len();
    let node_time_ms: u64 = nodes.iter().map(|n| n.execution_time_ms).sum();
    let slowest = nodes
        .iter()
        .filter(|n| n.execution_time_ms > 0)
        .max_by_key(|n| n.execution_time_ms);
    let wall_ms = result.total_execution_time_ms.max(1);

    let performance = PerformanceMetrics {
        total_execution_time_ms: result.total_execution_time_ms,
        node_time_ms,
        average_latency_ms: if total_nodes == 0 {
            0.0
        } else {
            node_time_ms as f64 / total_nodes as f64
        },
        max_latency_ms: slowest.map(|n| n.execution_time_ms).unwrap_or(0),
        slowest_node: slowest.map(|n| n.node_id.clone()),
        throughput_nodes_per_sec: total_nodes as f64 * 1000.0 / wall_ms as f64,
        total_memory_bytes: nodes.iter().map(|n| n.memory_bytes).sum(),
        peak_memory_bytes: nodes.iter().map(|n| n.memory_bytes).max().unwrap_or(0),
    };

    let llm_nodes: Vec<_> = result.results.values().filter(|r| r.kind == "llm").collect();
    let llm_bytes: u64 = llm_nodes.iter().map(|r| payload_bytes(&r.output)).sum();
    let stored_bytes: u64 = nodes.iter().map(|n| n.output_bytes).sum();

    let llm = result.total_cost;
    let compute = result.total_execution_time_ms as f64 / 1000.0 * COMPUTE_COST_PER_SECOND;
    let storage = stored_bytes as f64 / BYTES_PER_GB * STORAGE_COST_PER_GB;
    let network = llm_bytes as f64 / BYTES_PER_GB * NETWORK_COST_PER_GB;
    let cost = CostBreakdown {
        llm,
        compute,
        storage,
        network,
        total: llm + compute + storage + network,
    };

    let failed_nodes = nodes.iter().filter(|n| n.error.is_some()).count();
    let succeeded_llm: Vec<_> = llm_nodes.iter().filter(|r| !r.is_error()).collect();
    let quality = QualityMetrics {
        total_nodes,
        failed_nodes,
        error_rate: if total_nodes == 0 {
            0.0
        } else {
            failed_nodes as f64 / total_nodes as f64
        },
        completed: result.status == WorkflowStatus::Completed,
        average_llm_output_length: if succeeded_llm.is_empty() {
            0.0
        } else {
            succeeded_llm.iter().map(|r| output_length(&r.output)).sum::<usize>() as f64
                / succeeded_llm.len() as f64
        },
    };

    WorkflowAnalytics {
        run_id: result.run_id.clone(),
        workflow: result.workflow.clone(),
        status: result.status,
        performance,
        cost,
        quality,
        nodes,
    }
}

/// Plain-language tuning hints for a summary. Empty when nothing stands out.
pub fn suggestions(analytics: &WorkflowAnalytics) -> Vec<String> {
    let mut out = Vec::new();

    for node in &analytics.nodes {
        if node.execution_time_ms > SLOW_NODE_MS {
            out.push(format!(
                "Node {} took {:.1}s, consider optimizing it or caching its output",
                node.node_id,
                node.execution_time_ms as f64 / 1000.0
            ));
        }
        if node.memory_bytes > HIGH_MEMORY_BYTES {
            out.push(format!(
                "Node {} used {:.1} MiB, consider trimming the data passed to it",
                node.node_id,
                node.memory_bytes as f64 / (1024.0 * 1024.0)
            ));
        }
    }

    if analytics.quality.error_rate > HIGH_ERROR_RATE {
        let failed: Vec<&str> = analytics
            .nodes
            .iter()
            .filter(|n| n.error.is_some())
            .map(|n| n.node_id.as_str())
            .collect();
        out.push(format!(
            "Error rate is {:.0}%, review failing nodes: {}",
            analytics.quality.error_rate * 100.0,
            failed.join(", ")
        ));
    }

    if analytics.cost.llm > HIGH_LLM_COST {
        out.push(format!(
            "Model calls cost ${:.2}, consider a cheaper model or a lower max_tokens",
            analytics.cost.llm
        ));
    }

    if analytics.quality.total_nodes > 1
        && analytics.performance.throughput_nodes_per_sec < LOW_THROUGHPUT_NODES_PER_SEC
    {
        out.push(format!(
            "Throughput is {:.2} nodes/s, look at the slowest node ({})",
            analytics.performance.throughput_nodes_per_sec,
            analytics.performance.slowest_node.as_deref().unwrap_or("n/a")
        ));
    }

    out
}

//! Workflow execution: validation and ordering, node executors, the
//! orchestrator, run logging and post-run analytics.

pub mod analytics;
pub mod nodes;
pub mod orchestrator;
pub mod run_log;
pub mod scheduler;
pub mod templates;

pub use analytics::{suggestions, summarize, WorkflowAnalytics};
pub use nodes::{ExecutorTable, NodeContext, NodeExecutor, NodeOutput};
pub use orchestrator::{resolve_input, RunOptions, WorkflowExecutor};
pub use run_log::RunLogger;

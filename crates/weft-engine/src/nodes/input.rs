use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::Result;
use weft_core::types::Node;

use super::{NodeContext, NodeExecutor, NodeOutput};

/// Emits the run's initial input, falling back to the node's default value.
pub struct InputExecutor;

impl NodeExecutor for InputExecutor {
    fn kind(&self) -> &'static str {
        "input"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: Value,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let output = if input.is_null() {
                node.config.default_value.clone().unwrap_or(Value::Null)
            } else {
                input
            };
            Ok(NodeOutput::value(output))
        })
    }
}

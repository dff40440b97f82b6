use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::Result;
use weft_core::types::Node;

use super::{NodeContext, NodeExecutor, NodeOutput};

/// Passes its resolved input through unchanged.
pub struct OutputExecutor;

impl NodeExecutor for OutputExecutor {
    fn kind(&self) -> &'static str {
        "output"
    }

    fn execute<'a>(
        &'a self,
        _node: &'a Node,
        input: Value,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move { Ok(NodeOutput::value(input)) })
    }
}

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{CompletionRequest, Node, NodeKind};
use weft_llm::{PricingTable, ProviderRegistry};

use super::{NodeContext, NodeExecutor, NodeOutput};

/// Calls a registered provider with the node's resolved input as the prompt.
pub struct LlmExecutor {
    providers: Arc<ProviderRegistry>,
    pricing: Arc<PricingTable>,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl LlmExecutor {
    pub fn new(providers: Arc<ProviderRegistry>, pricing: Arc<PricingTable>) -> Self {
        Self {
            providers,
            pricing,
            default_temperature: 0.7,
            default_max_tokens: 1000,
        }
    }

    pub fn with_defaults(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.default_temperature = temperature;
        self.default_max_tokens = max_tokens;
        self
    }
}

/// Prompt text for a resolved input: strings verbatim, null empty, anything
/// else as compact JSON.
pub fn prompt_text(input: &Value) -> String {
    match input {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl NodeExecutor for LlmExecutor {
    fn kind(&self) -> &'static str {
        "llm"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: Value,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let NodeKind::Llm { provider, model } = &node.kind else {
                return Err(WeftError::Shape(format!("node '{}' is not an llm node", node.id)));
            };

            let adapter = self
                .providers
                .get(provider)
                .ok_or_else(|| WeftError::ProviderNotConfigured(provider.clone()))?;

            let request = CompletionRequest {
                model_id: model.clone(),
                prompt: prompt_text(&input),
                temperature: node.config.temperature.unwrap_or(self.default_temperature),
                max_tokens: node.config.max_tokens.unwrap_or(self.default_max_tokens),
            };
            debug!(node_id = %node.id, %provider, %model, prompt_len = request.prompt.len(), "Calling provider");

            let completion = adapter.call(request).await.map_err(|e| WeftError::NodeExecution {
                node: node.id.clone(),
                message: format!("{}/{}: {}", provider, model, e),
            })?;

            let usage = completion.usage;
            Ok(NodeOutput {
                output: Value::String(completion.content),
                cost: self.pricing.cost(model, &usage),
                tokens_used: usage.total(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                memory_bytes: None,
            })
        })
    }
}

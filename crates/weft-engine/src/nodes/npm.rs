use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::types::{Node, NodeKind};
use weft_sandbox::{default_snippet, SandboxExecutor};

use super::{NodeContext, NodeExecutor, NodeOutput};

/// Runs the node's snippet against its package in the sandbox.
pub struct NpmExecutor {
    sandbox: Arc<SandboxExecutor>,
}

impl NpmExecutor {
    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }
}

/// The node's own code if non-blank, else the package's default snippet.
pub fn snippet_for<'a>(node: &'a Node, package: &str) -> &'a str {
    match node.config.code.as_deref() {
        Some(code) if !code.trim().is_empty() => code,
        _ => default_snippet(package),
    }
}

impl NodeExecutor for NpmExecutor {
    fn kind(&self) -> &'static str {
        "npm"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: Value,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let NodeKind::Npm { package } = &node.kind else {
                return Err(WeftError::Shape(format!("node '{}' is not an npm node", node.id)));
            };

            let code = snippet_for(node, package);
            let timeout = self.sandbox.timeout().min(ctx.timeout);
            let outcome = self
                .sandbox
                .execute_with_timeout(package, code, &input, timeout)
                .await?;

            if !outcome.success {
                return Err(WeftError::NodeExecution {
                    node: node.id.clone(),
                    message: outcome
                        .error
                        .unwrap_or_else(|| "snippet failed".to_string()),
                });
            }

            Ok(NodeOutput {
                output: outcome.output,
                memory_bytes: Some(outcome.memory_bytes),
                ..Default::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use weft_core::config::{SandboxConfig, SandboxMode};
    use weft_sandbox::IDENTITY_SNIPPET;

    fn executor() -> NpmExecutor {
        let config = SandboxConfig {
            mode: SandboxMode::Inline,
            ..Default::default()
        };
        NpmExecutor::new(Arc::new(SandboxExecutor::new(config)))
    }

    fn ctx() -> NodeContext {
        NodeContext::new(Value::Null, Duration::from_secs(5))
    }

    #[test]
    fn test_snippet_selection() {
        let custom = Node::npm("p", "lodash").with_code("return 1;");
        assert_eq!(snippet_for(&custom, "lodash"), "return 1;");

        let blank = Node::npm("p", "left-pad").with_code("   ");
        assert_eq!(snippet_for(&blank, "left-pad"), IDENTITY_SNIPPET);
    }

    #[tokio::test]
    async fn test_runs_snippet() {
        let node = Node::npm("double", "lodash").with_code("return input.map(x => x * 2);");
        let out = executor().execute(&node, json!([1, 2, 3]), &ctx()).await.unwrap();
        assert_eq!(out.output, json!([2, 4, 6]));
        assert!(out.memory_bytes.unwrap_or(0) > 0);
        assert_eq!(out.cost, 0.0);
    }

    #[tokio::test]
    async fn test_thrown_error_becomes_node_error() {
        let node = Node::npm("boom", "lodash").with_code("throw new Error('bad input');");
        let err = executor().execute(&node, json!(null), &ctx()).await.unwrap_err();
        assert!(matches!(err, WeftError::NodeExecution { .. }));
        assert!(err.to_string().contains("bad input"));
    }

    #[tokio::test]
    async fn test_package_not_allowed() {
        let node = Node::npm("p", "left-pad");
        let err = executor().execute(&node, json!("x"), &ctx()).await.unwrap_err();
        assert!(matches!(err, WeftError::PackageNotAllowed(_)));
    }
}

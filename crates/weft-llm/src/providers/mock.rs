use futures::future::BoxFuture;

use weft_core::error::Result;
use weft_core::traits::ProviderAdapter;
use weft_core::types::{Completion, CompletionRequest, TokenUsage};

/// Longest prompt excerpt echoed back in a canned response.
const ECHO_CHARS: usize = 80;

/// Offline adapter returning a canned response derived from the request.
///
/// Same request, same answer. Never touches the network and never fails.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The canned completion for a request.
    pub fn respond(&self, request: &CompletionRequest) -> Completion {
        let excerpt: String = request.prompt.chars().take(ECHO_CHARS).collect();
        let ellipsis = if request.prompt.chars().count() > ECHO_CHARS {
            "..."
        } else {
            ""
        };
        let content = format!(
            "[{} {}] Mock response to: {}{}",
            self.name, request.model_id, excerpt, ellipsis
        );

        let completion_tokens = estimate_tokens(&content).min(request.max_tokens.max(1) as u64);
        Completion {
            usage: TokenUsage {
                prompt_tokens: estimate_tokens(&request.prompt),
                completion_tokens,
            },
            content,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("mock")
    }
}

/// Rough token estimate: one token per four characters, at least one.
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4).max(1)
}

impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        let completion = self.respond(&request);
        Box::pin(async move { Ok(completion) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model_id: "test-model".into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let mock = MockProvider::default();
        let a = mock.call(request("summarize this")).await.unwrap();
        let b = mock.call(request("summarize this")).await.unwrap();
        assert_eq!(a, b);
        assert!(a.content.contains("summarize this"));
        assert!(a.content.contains("test-model"));
    }

    #[tokio::test]
    async fn test_mock_handles_empty_prompt() {
        let mock = MockProvider::default();
        let completion = mock.call(request("")).await.unwrap();
        assert_eq!(completion.usage.prompt_tokens, 1);
        assert!(completion.usage.completion_tokens >= 1);
    }

    #[test]
    fn test_long_prompt_is_truncated() {
        let mock = MockProvider::default();
        let long = "x".repeat(500);
        let completion = mock.respond(&request(&long));
        assert!(completion.content.ends_with("..."));
        assert_eq!(completion.usage.prompt_tokens, 125);
    }
}

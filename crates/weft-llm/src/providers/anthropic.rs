use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::ProviderAdapter;
use weft_core::types::{Completion, CompletionRequest, TokenUsage};

use super::{http_error, ProviderSettings};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    http: Client,
    settings: ProviderSettings,
}

impl AnthropicAdapter {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub(crate) fn parse_response(body: &str) -> Result<Completion> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| WeftError::ProviderCall(format!("malformed response: {}", e)))?;

    let content: String = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
        })
        .unwrap_or_default();

    Ok(Completion { content, usage })
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn call(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        Box::pin(async move {
            let api_key = self
                .settings
                .api_key
                .as_deref()
                .ok_or_else(|| WeftError::ProviderCall("Anthropic API key not set".into()))?;

            let base_url = self
                .settings
                .base_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_URL);

            let body = MessagesRequest {
                model: &request.model_id,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                messages: vec![ApiMessage {
                    role: "user",
                    content: &request.prompt,
                }],
            };

            debug!(model = %request.model_id, "Sending Anthropic messages request");

            let mut req = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json");
            for (k, v) in &self.settings.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .json(&body)
                .send()
                .await
                .map_err(|e| WeftError::ProviderCall(e.to_string()))?;

            if !response.status().is_success() {
                return Err(http_error(response).await);
            }

            let text = response
                .text()
                .await
                .map_err(|e| WeftError::ProviderCall(e.to_string()))?;
            parse_response(&text)
        })
    }
}

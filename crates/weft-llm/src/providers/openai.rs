use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::ProviderAdapter;
use weft_core::types::{Completion, CompletionRequest, TokenUsage};

use super::presets::{build_extra_headers, get_preset};
use super::{http_error, ProviderSettings};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible adapter. Works with OpenAI, Ollama, Groq, OpenRouter, etc.
pub struct OpenAiAdapter {
    name: String,
    http: Client,
    base_url: String,
    api_key: Option<String>,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiAdapter {
    pub fn new(name: impl Into<String>, settings: ProviderSettings) -> Self {
        let name = name.into();
        let preset = get_preset(&name);
        let base_url = settings
            .base_url
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.default_base_url.to_string()))
            .unwrap_or_else(|| OPENAI_API_URL.to_string());
        let extra_headers = build_extra_headers(preset.as_ref(), &settings.extra_headers);

        Self {
            name,
            http: Client::new(),
            base_url,
            api_key: settings.api_key,
            extra_headers,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn build_body(request: &CompletionRequest) -> ChatRequest<'_> {
    // o-series models reject temperature
    let is_o_series = request.model_id.starts_with("o1")
        || request.model_id.starts_with("o3")
        || request.model_id.starts_with("o4");

    ChatRequest {
        model: &request.model_id,
        messages: vec![OaiMessage {
            role: "user",
            content: &request.prompt,
        }],
        max_tokens: request.max_tokens,
        temperature: (!is_o_series).then_some(request.temperature),
        stream: false,
    }
}

pub(crate) fn parse_response(body: &str) -> Result<Completion> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| WeftError::ProviderCall(format!("malformed response: {}", e)))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| WeftError::ProviderCall("response contained no choices".into()))?;

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Completion { content, usage })
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        Box::pin(async move {
            let body = build_body(&request);
            let mut req = self.http.post(&self.base_url).json(&body);

            if let Some(api_key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            for (k, v) in &self.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            debug!(provider = %self.name, model = %request.model_id, "Sending completion request");

            let response = req
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

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model_id: model.into(),
            prompt: "hello".into(),
            temperature: 0.7,
            max_tokens: 100,
        }
    }

    #[test]
    fn test_body_shape() {
        let req = request("gpt-4o-mini");
        let json = serde_json::to_value(build_body(&req)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["stream"], false);
        assert!(json.get("temperature").is_some());
    }

    #[test]
    fn test_o_series_omits_temperature() {
        let req = request("o3-mini");
        let json = serde_json::to_value(build_body(&req)).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }"#;
        let completion = parse_response(body).unwrap();
        assert_eq!(completion.content, "hi there");
        assert_eq!(completion.usage.total(), 7);
    }

    #[test]
    fn test_parse_response_without_choices_fails() {
        let err = parse_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, WeftError::ProviderCall(_)));
    }

    #[test]
    fn test_preset_base_url() {
        let adapter = OpenAiAdapter::new("groq", ProviderSettings::with_key("k"));
        assert_eq!(
            adapter.base_url(),
            "https://api.groq.com/openai/v1/chat/completions"
        );

        let adapter = OpenAiAdapter::new(
            "local",
            ProviderSettings::default().with_base_url("http://127.0.0.1:9/v1"),
        );
        assert_eq!(adapter.base_url(), "http://127.0.0.1:9/v1");
    }
}

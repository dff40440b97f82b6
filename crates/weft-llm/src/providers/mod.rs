pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod presets;

use std::collections::HashMap;

use weft_core::config::ProviderConfig;

/// Credentials and endpoint used to build one adapter.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub extra_headers: HashMap<String, String>,
}

impl ProviderSettings {
    /// Settings carrying only a credential. An empty credential means none.
    pub fn with_key(credential: impl Into<String>) -> Self {
        let key = credential.into();
        Self {
            api_key: (!key.trim().is_empty()).then_some(key),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl From<&ProviderConfig> for ProviderSettings {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.clone(),
            extra_headers: config.extra_headers.clone(),
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Turn a non-success HTTP response into a `ProviderCall` error.
pub(crate) async fn http_error(response: reqwest::Response) -> weft_core::WeftError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    weft_core::WeftError::ProviderCall(format!("HTTP {}: {}", status, body))
}

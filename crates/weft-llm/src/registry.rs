use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use weft_core::config::{RetryConfig, WeftConfig};
use weft_core::traits::ProviderAdapter;

use crate::providers::ProviderSettings;
use crate::providers::mock::MockProvider;
use crate::retry::RetryingProvider;

/// Registry of provider adapters, keyed by lower-cased provider name.
///
/// Shared across concurrent runs: registration takes a write lock, lookups
/// only a read lock.
pub struct ProviderRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,
    retry: Option<RetryConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            retry: None,
        }
    }

    /// Wrap adapters built from credentials in a retrying adapter.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Registry populated from the `[providers.*]` and `[retry]` config sections.
    pub fn from_config(config: &WeftConfig) -> Self {
        let mut registry = Self::new();
        registry.retry = config.retry.clone();
        for (name, provider) in &config.providers {
            registry.register_with(name, ProviderSettings::from(provider));
        }
        registry
    }

    /// Register a provider by name with a credential.
    pub fn register(&self, name: &str, credential: impl Into<String>) {
        self.register_with(name, ProviderSettings::with_key(credential));
    }

    /// Register a provider by name with full settings.
    pub fn register_with(&self, name: &str, settings: ProviderSettings) {
        let adapter = crate::create_adapter(name, settings);
        let adapter: Arc<dyn ProviderAdapter> = match &self.retry {
            Some(retry) => Arc::new(RetryingProvider::new(adapter, retry.clone())),
            None => adapter,
        };
        self.register_adapter(name, adapter);
    }

    /// Register a ready-made adapter, replacing any adapter of the same name.
    pub fn register_adapter(&self, name: &str, adapter: Arc<dyn ProviderAdapter>) {
        let key = name.to_ascii_lowercase();
        let replaced = self
            .adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), adapter)
            .is_some();
        info!(provider = %key, replaced, "Registered provider");
    }

    /// Register the offline mock adapter under `name`.
    pub fn register_mock(&self, name: &str) {
        self.register_adapter(name, Arc::new(MockProvider::new(name.to_ascii_lowercase())));
    }

    /// Remove a provider. Returns whether one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }

    /// Look up an adapter by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        let found = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_ascii_lowercase())
            .cloned();
        if found.is_none() {
            debug!(provider = %name, "Provider lookup missed");
        }
        found
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::config::ProviderConfig;
    use weft_core::types::CompletionRequest;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ProviderRegistry::new();
        registry.register("OpenAI", "sk-test");
        assert!(registry.get("openai").is_some());
        assert!(registry.get("OPENAI").is_some());
        assert!(registry.get("anthropic").is_none());
        assert_eq!(registry.names(), vec!["openai"]);
    }

    #[test]
    fn test_create_adapter_by_name() {
        let registry = ProviderRegistry::new();
        registry.register("claude", "key");
        registry.register("groq", "key");
        assert_eq!(registry.get("claude").unwrap().name(), "anthropic");
        assert_eq!(registry.get("groq").unwrap().name(), "groq");
    }

    #[tokio::test]
    async fn test_mock_registered_without_credentials() {
        let registry = ProviderRegistry::new();
        registry.register("mock", "");
        let adapter = registry.get("Mock").unwrap();
        let completion = adapter
            .call(CompletionRequest {
                model_id: "any".into(),
                prompt: "hello".into(),
                temperature: 0.0,
                max_tokens: 16,
            })
            .await
            .unwrap();
        assert!(completion.content.contains("hello"));
    }

    #[test]
    fn test_reregistering_replaces() {
        let registry = ProviderRegistry::new();
        registry.register("openai", "a");
        registry.register_mock("OpenAI");
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("openai"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_config() {
        let mut config = WeftConfig::default();
        config.providers.insert(
            "ollama".into(),
            ProviderConfig {
                base_url: Some("http://localhost:11434/v1/chat/completions".into()),
                ..Default::default()
            },
        );
        config.retry = Some(RetryConfig::default());
        let registry = ProviderRegistry::from_config(&config);
        // Retry wrapper keeps the inner name
        assert_eq!(registry.get("ollama").unwrap().name(), "ollama");
    }

    #[test]
    fn test_concurrent_reads() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register_mock("mock");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get("mock").is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}

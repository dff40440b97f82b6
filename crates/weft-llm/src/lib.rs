pub mod pricing;
pub mod providers;
pub mod registry;
pub mod retry;

use std::sync::Arc;

use weft_core::traits::ProviderAdapter;

pub use pricing::{ModelPrice, PricingTable};
pub use providers::anthropic::AnthropicAdapter;
pub use providers::mock::MockProvider;
pub use providers::openai::OpenAiAdapter;
pub use providers::ProviderSettings;
pub use registry::ProviderRegistry;
pub use retry::RetryingProvider;

/// Create a provider adapter based on the provider name.
pub fn create_adapter(name: &str, settings: ProviderSettings) -> Arc<dyn ProviderAdapter> {
    match name.to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => Arc::new(AnthropicAdapter::new(settings)),
        "mock" | "noop" => Arc::new(MockProvider::new(name)),
        // Everything else uses the OpenAI-compatible adapter
        other => Arc::new(OpenAiAdapter::new(other, settings)),
    }
}

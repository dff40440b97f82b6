use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Completion, CompletionRequest};

/// Uniform wrapper around one model vendor.
///
/// Failures of the underlying remote call are reported as
/// [`WeftError::ProviderCall`](crate::error::WeftError::ProviderCall) so callers
/// stay provider-agnostic.
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Provider name (e.g., "openai", "anthropic", "mock").
    fn name(&self) -> &str;

    /// Send one prompt and wait for the full completion.
    fn call(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>>;
}

//! Generation provider contract.

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::stream::StreamEventStream;
use crate::types::GenerationRequest;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start one generation step and return its ordered event stream.
    ///
    /// Failures after the stream has started arrive as `StreamEvent::Error`.
    async fn stream(&self, request: GenerationRequest) -> Result<StreamEventStream, ProviderError>;

    /// Upstream provider slugs able to serve `model`, when the gateway can
    /// report them. `Ok(None)` means the list is not obtainable.
    async fn endpoints_for_model(&self, model: &str) -> Result<Option<Vec<String>>, ProviderError> {
        let _ = model;
        Ok(None)
    }
}

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::types::{GenerationRequest, GenerationResponse, ModelDescriptor, ProviderKind, StreamChunk};

/// A finite, lazily-produced sequence of stream chunks.
///
/// The sequence terminates with a chunk whose `is_final` flag is set; it is
/// not restartable. Dropping the stream must release the underlying
/// provider connection.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Uniform interface to one AI backend (hosted API or local server).
///
/// Implementations hide transport and auth details; the registry only sees
/// this contract. All methods fail with `Error::ModelProvider` on
/// non-success responses or timeouts.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider family this adapter serves.
    fn provider(&self) -> ProviderKind;

    /// Prepare the adapter (verify credentials, probe the endpoint).
    async fn initialize(&self) -> Result<()>;

    /// List the models this adapter can serve.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;

    /// Generate a completion for the given model.
    ///
    /// The returned response carries content and token usage; request id,
    /// model id, latency, and cost are stamped by the orchestrator.
    async fn generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse>;

    /// Generate a streaming completion. Chunk numbering from the adapter is
    /// ignored; the orchestrator renumbers.
    async fn generate_stream(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<ChunkStream>;

    /// Probe whether a model is currently serviceable.
    async fn check_health(&self, model_id: &str) -> Result<bool>;

    /// Apply model-specific configuration options.
    async fn configure(
        &self,
        model_id: &str,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

//! Provider plumbing: per-model runtime statistics and the mock adapter.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use modelflow_core::{
    traits::{ChunkStream, ProviderAdapter},
    types::{
        GenerationRequest, GenerationResponse, ModelDescriptor, ProviderKind, StreamChunk,
        TokenUsage,
    },
    Error, Result,
};

/// Rolling runtime statistics for one catalog entry.
///
/// Updates are atomic per model id and independent across model ids; the
/// latency window keeps the most recent samples and drops older ones
/// rather than decaying them.
#[derive(Debug)]
pub struct ModelRuntimeStats {
    request_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
    window: usize,
}

impl ModelRuntimeStats {
    /// Create stats with the given latency window size.
    pub fn new(window: usize) -> Self {
        Self {
            request_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    /// Record a successful call and its latency.
    pub fn record_success(&self, latency_ms: f64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies.lock().unwrap();
        if latencies.len() == self.window {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total requests observed.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Average latency over the retained window, if any samples exist.
    pub fn average_latency_ms(&self) -> Option<f64> {
        let latencies = self.latencies.lock().unwrap();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
    }

    /// Fraction of observed calls that failed.
    pub fn failure_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.failure_count.load(Ordering::Relaxed) as f64 / total as f64
        }
    }
}

// =============================================================================
// Mock Provider Adapter for Testing
// =============================================================================

/// Mock provider adapter for testing without real backends.
pub struct MockProviderAdapter {
    provider: ProviderKind,
    models: Vec<ModelDescriptor>,
    response: String,
    verbatim: bool,
    should_fail: AtomicBool,
    healthy: AtomicBool,
}

impl MockProviderAdapter {
    /// Create a mock serving the given models.
    pub fn new(
        provider: ProviderKind,
        models: Vec<ModelDescriptor>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            models,
            response: response.into(),
            verbatim: false,
            should_fail: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
        }
    }

    /// Create a mock whose generation calls always fail.
    pub fn failing(provider: ProviderKind, models: Vec<ModelDescriptor>) -> Self {
        let mock = Self::new(provider, models, String::new());
        mock.should_fail.store(true, Ordering::Relaxed);
        mock
    }

    /// Return the canned response as-is instead of echoing the prompt.
    /// Useful when a test needs structured (JSON) model output.
    pub fn with_verbatim_response(mut self) -> Self {
        self.verbatim = true;
        self
    }

    /// Flip the failure switch at runtime.
    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::Relaxed);
    }

    /// Flip the health probe result at runtime.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    fn check(&self) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::model_provider("Mock provider failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self.models.clone())
    }

    async fn generate(
        &self,
        _model_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse> {
        self.check()?;

        let content = if self.verbatim {
            self.response.clone()
        } else {
            format!("{}: {}", self.response, request.prompt)
        };
        let usage = TokenUsage::new(
            request.prompt.len() as u64 / 4,
            self.response.len() as u64 / 4,
        );

        let mut response = GenerationResponse::from_provider(content, usage);
        response.confidence_score = Some(0.8);
        Ok(response)
    }

    async fn generate_stream(
        &self,
        _model_id: &str,
        request: &GenerationRequest,
    ) -> Result<ChunkStream> {
        self.check()?;

        let words: Vec<String> = self
            .response
            .split_whitespace()
            .map(|w| format!("{} ", w))
            .collect();
        let total_tokens =
            request.prompt.len() as u64 / 4 + self.response.len() as u64 / 4;

        // Deliberately misnumber chunks so tests prove the orchestrator
        // renumbers from 0.
        let mut chunks: Vec<Result<StreamChunk>> = words
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let mut chunk = StreamChunk::content(content);
                chunk.chunk_id = 1000 + i as u64;
                Ok(chunk)
            })
            .collect();
        chunks.push(Ok(StreamChunk::terminal("mock", total_tokens)));

        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn check_health(&self, _model_id: &str) -> Result<bool> {
        Ok(self.healthy.load(Ordering::Relaxed))
    }

    async fn configure(
        &self,
        model_id: &str,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.check()?;
        Ok(serde_json::json!({
            "model_id": model_id,
            "applied": options,
        }))
    }
}

//! The model registry: live catalog, health tracking, selection, dispatch.

use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use modelflow_core::{
    traits::{ChunkStream, ProviderAdapter},
    types::{
        GenerationRequest, GenerationResponse, HealthStatus, ModelDescriptor, ProviderKind,
    },
    Error, Result,
};

use crate::pricing::estimate_cost;
use crate::providers::ModelRuntimeStats;
use crate::selector;

/// Buffered chunks between the adapter task and a streaming consumer.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Owns the live catalog of models across all provider adapters and picks
/// the best one per request, with deterministic fallback on failure.
///
/// One registry instance per process, constructor-injected into callers;
/// tests construct a fresh registry per case.
pub struct ModelRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    catalog: DashMap<String, ModelDescriptor>,
    /// Registration order; the documented deterministic iteration order for
    /// scoring tie-breaks.
    catalog_order: RwLock<Vec<String>>,
    stats: DashMap<String, Arc<ModelRuntimeStats>>,
    latency_window: usize,
    generate_timeout: Duration,
    stream_timeout: Duration,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            catalog: DashMap::new(),
            catalog_order: RwLock::new(Vec::new()),
            stats: DashMap::new(),
            latency_window: 100,
            generate_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(600),
        }
    }

    /// Set single-shot and streaming call timeouts. Streaming calls tolerate
    /// a much longer total duration than single-shot calls.
    pub fn with_timeouts(mut self, generate: Duration, stream: Duration) -> Self {
        self.generate_timeout = generate;
        self.stream_timeout = stream;
        self
    }

    /// Set how many latency samples are retained per model.
    pub fn with_latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Register a provider adapter. One adapter per provider family.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let kind = adapter.provider();
        if self.adapters.insert(kind, adapter).is_some() {
            tracing::warn!(provider = %kind, "Replaced existing adapter for provider");
        }
    }

    /// Initialize all adapters and load their model catalogs.
    ///
    /// A provider that fails to initialize is logged and skipped; the
    /// registry stays usable with whatever providers came up.
    pub async fn initialize(&self) -> Result<()> {
        for (kind, adapter) in &self.adapters {
            if let Err(e) = adapter.initialize().await {
                tracing::warn!(provider = %kind, error = %e, "Provider failed to initialize");
                continue;
            }

            match adapter.list_models().await {
                Ok(models) => {
                    for mut descriptor in models {
                        descriptor.health_status = HealthStatus::Healthy;
                        self.register_model(descriptor);
                    }
                    tracing::info!(provider = %kind, "Provider initialized");
                }
                Err(e) => {
                    tracing::error!(provider = %kind, error = %e, "Error loading models from provider");
                }
            }
        }

        tracing::info!(models = self.catalog.len(), "Model registry initialized");
        Ok(())
    }

    /// Add a model to the catalog. Model ids are globally unique across
    /// providers; a colliding id is rejected and logged.
    pub fn register_model(&self, descriptor: ModelDescriptor) {
        let model_id = descriptor.model_id.clone();
        if self.catalog.contains_key(&model_id) {
            tracing::warn!(model = %model_id, "Duplicate model id ignored");
            return;
        }

        self.catalog.insert(model_id.clone(), descriptor);
        self.catalog_order.write().unwrap().push(model_id.clone());
        self.stats
            .insert(model_id, Arc::new(ModelRuntimeStats::new(self.latency_window)));
    }

    /// Re-read model catalogs from every adapter, registering models that
    /// appeared since startup. Existing entries keep their runtime state.
    pub async fn reload_models(&self) {
        tracing::info!("Reloading model catalogs");
        for (kind, adapter) in &self.adapters {
            match adapter.list_models().await {
                Ok(models) => {
                    for mut descriptor in models {
                        if !self.catalog.contains_key(&descriptor.model_id) {
                            descriptor.health_status = HealthStatus::Healthy;
                            self.register_model(descriptor);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(provider = %kind, error = %e, "Error reloading models");
                }
            }
        }
    }

    /// Snapshot of the catalog in registration order.
    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        let order = self.catalog_order.read().unwrap();
        order
            .iter()
            .filter_map(|id| self.catalog.get(id).map(|entry| entry.clone()))
            .collect()
    }

    /// Look up one model.
    pub fn get_model(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.catalog.get(model_id).map(|entry| entry.clone())
    }

    /// Number of models in the catalog.
    pub fn model_count(&self) -> usize {
        self.catalog.len()
    }

    fn stats_for(&self, model_id: &str) -> Arc<ModelRuntimeStats> {
        self.stats
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(ModelRuntimeStats::new(self.latency_window)))
            .clone()
    }

    /// Select the best model for a request.
    ///
    /// An available preferred model always wins, regardless of score.
    /// Otherwise candidates are the active + healthy models, scored by the
    /// selector; ties keep the earliest-registered model.
    pub fn select_model(&self, request: &GenerationRequest) -> Result<String> {
        if let Some(preferred) = &request.preferred_model {
            if let Some(entry) = self.catalog.get(preferred) {
                if entry.is_available() {
                    return Ok(preferred.clone());
                }
            }
            tracing::debug!(model = %preferred, "Preferred model unavailable, scoring candidates");
        }

        let order = self.catalog_order.read().unwrap().clone();
        let mut candidates: Vec<(ModelDescriptor, Option<f64>)> = Vec::new();
        for id in &order {
            if let Some(entry) = self.catalog.get(id) {
                if entry.is_available() {
                    let avg = self.stats.get(id).and_then(|s| s.average_latency_ms());
                    candidates.push((entry.clone(), avg));
                }
            }
        }

        selector::select_best(
            candidates.iter().map(|(descriptor, avg)| (descriptor, *avg)),
            request,
        )
        .ok_or(Error::NoAvailableModel)
    }

    fn adapter_for(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&descriptor.provider)
            .cloned()
            .ok_or_else(|| {
                Error::model_provider(format!(
                    "Provider not available for model {}",
                    descriptor.model_id
                ))
            })
    }

    async fn try_generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
        request_id: &str,
        started: Instant,
    ) -> Result<GenerationResponse> {
        let descriptor = self
            .get_model(model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.to_string()))?;
        let adapter = self.adapter_for(&descriptor)?;

        let result = tokio::time::timeout(self.generate_timeout, adapter.generate(model_id, request))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "Generation with {} exceeded {:?}",
                    model_id, self.generate_timeout
                ))
            })?;

        match result {
            Ok(mut response) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                response.request_id = request_id.to_string();
                response.model_used = model_id.to_string();
                response.processing_time_ms = elapsed_ms;
                response.estimated_cost = estimate_cost(&descriptor.pricing, &response.token_usage);
                response.currency = descriptor.pricing.currency().to_string();

                self.stats_for(model_id).record_success(elapsed_ms);
                Ok(response)
            }
            Err(e) => {
                self.stats_for(model_id).record_failure();
                Err(e)
            }
        }
    }

    /// Generate a response using the best available model, falling back
    /// through `request.fallback_models` in caller order on failure.
    ///
    /// The only failures a caller sees are a selection failure
    /// (`NoAvailableModel`) or the aggregate `AllModelsFailed` once every
    /// attempt is exhausted.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        metrics::counter!("modelflow_generation_requests_total").increment(1);

        let started = Instant::now();
        let request_id = format!("req_{}", Uuid::new_v4());

        let primary = self.select_model(request)?;

        let mut attempts = 1;
        let mut last_error = match self.try_generate(&primary, request, &request_id, started).await {
            Ok(response) => {
                tracing::info!(
                    model = %primary,
                    latency_ms = response.processing_time_ms,
                    "Generated response"
                );
                return Ok(response);
            }
            Err(e) => {
                tracing::error!(model = %primary, error = %e, "Primary model failed");
                e
            }
        };
        for fallback in &request.fallback_models {
            if fallback == &primary {
                continue;
            }
            let available = self
                .get_model(fallback)
                .map(|m| m.is_available())
                .unwrap_or(false);
            if !available {
                continue;
            }

            tracing::info!(model = %fallback, "Trying fallback model");
            metrics::counter!("modelflow_generation_fallbacks_total").increment(1);
            attempts += 1;

            match self.try_generate(fallback, request, &request_id, started).await {
                Ok(response) => {
                    tracing::info!(model = %fallback, "Fallback model succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    tracing::error!(model = %fallback, error = %e, "Fallback model failed");
                    last_error = e;
                }
            }
        }

        metrics::counter!("modelflow_generation_failures_total").increment(1);
        Err(Error::AllModelsFailed {
            attempts,
            last: last_error.to_string(),
        })
    }

    /// Generate a streaming response.
    ///
    /// Fails fast with a capability error when the selected model does not
    /// support streaming. Chunk ids are renumbered sequentially from 0 here,
    /// so adapters need not agree on numbering; the bounded channel gives
    /// backpressure and lets a departed consumer end the producer.
    pub async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream> {
        let model_id = self.select_model(request)?;
        let descriptor = self
            .get_model(&model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.clone()))?;

        if !descriptor.supports_streaming {
            return Err(Error::StreamingUnsupported(model_id));
        }

        let adapter = self.adapter_for(&descriptor)?;
        let started = Instant::now();

        let mut upstream = tokio::time::timeout(
            self.generate_timeout,
            adapter.generate_stream(&model_id, request),
        )
        .await
        .map_err(|_| Error::timeout(format!("Stream start with {} timed out", model_id)))??;

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let stats = self.stats_for(&model_id);
        let stream_timeout = self.stream_timeout;

        tokio::spawn(async move {
            let deadline = tokio::time::sleep(stream_timeout);
            tokio::pin!(deadline);

            let mut chunk_id = 0u64;
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        stats.record_failure();
                        let _ = tx
                            .send(Err(Error::timeout(format!(
                                "Stream from {} exceeded {:?}",
                                model_id, stream_timeout
                            ))))
                            .await;
                        break;
                    }
                    item = upstream.next() => {
                        match item {
                            Some(Ok(mut chunk)) => {
                                chunk.chunk_id = chunk_id;
                                chunk_id += 1;

                                let is_final = chunk.is_final;
                                if is_final {
                                    chunk.model_used = Some(model_id.clone());
                                    stats.record_success(started.elapsed().as_secs_f64() * 1000.0);
                                }

                                // Consumer gone: drop the upstream so the
                                // adapter connection closes.
                                if tx.send(Ok(chunk)).await.is_err() {
                                    break;
                                }
                                if is_final {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                stats.record_failure();
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Apply model-specific configuration. `is_active` toggles are applied
    /// to the catalog entry as well.
    pub async fn configure_model(
        &self,
        model_id: &str,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let descriptor = self
            .get_model(model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.to_string()))?;
        let adapter = self.adapter_for(&descriptor)?;

        let result = adapter.configure(model_id, options).await?;

        if let Some(active) = options.get("is_active").and_then(|v| v.as_bool()) {
            if let Some(mut entry) = self.catalog.get_mut(model_id) {
                entry.is_active = active;
            }
        }

        Ok(result)
    }

    /// Probe every catalog entry once, updating health state.
    ///
    /// Probe failures mark a model unhealthy but never remove it from the
    /// catalog, and they never propagate to callers.
    pub async fn run_health_checks(&self) {
        let order = self.catalog_order.read().unwrap().clone();

        for model_id in order {
            let Some(descriptor) = self.get_model(&model_id) else {
                continue;
            };
            let Ok(adapter) = self.adapter_for(&descriptor) else {
                continue;
            };

            let status = match adapter.check_health(&model_id).await {
                Ok(true) => HealthStatus::Healthy,
                Ok(false) => HealthStatus::Unhealthy,
                Err(e) => {
                    tracing::error!(model = %model_id, error = %e, "Health check failed");
                    HealthStatus::Unhealthy
                }
            };

            if let Some(mut entry) = self.catalog.get_mut(&model_id) {
                if entry.health_status != status {
                    tracing::info!(model = %model_id, status = ?status, "Model health changed");
                }
                entry.health_status = status;
                entry.last_health_check = Some(chrono::Utc::now());
            }
        }
    }

    /// Spawn the periodic health-check loop. The loop never blocks request
    /// serving; its failures are logged and swallowed.
    pub fn spawn_health_loop(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval fires immediately; consume the first tick so probes
            // start one full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.run_health_checks().await;
            }
        })
    }

    /// Status snapshot for diagnostics.
    pub fn status(&self) -> serde_json::Value {
        let models = self.list_models();
        let healthy = models
            .iter()
            .filter(|m| m.health_status == HealthStatus::Healthy)
            .count();
        let total_requests: u64 = models
            .iter()
            .filter_map(|m| self.stats.get(&m.model_id))
            .map(|s| s.request_count())
            .sum();

        let average_response_times: serde_json::Map<String, serde_json::Value> = models
            .iter()
            .map(|m| {
                let avg = self
                    .stats
                    .get(&m.model_id)
                    .and_then(|s| s.average_latency_ms())
                    .unwrap_or(0.0);
                (m.model_id.clone(), serde_json::json!(avg))
            })
            .collect();

        serde_json::json!({
            "status": if healthy > 0 { "healthy" } else { "unhealthy" },
            "total_models": models.len(),
            "healthy_models": healthy,
            "total_requests": total_requests,
            "average_response_times": average_response_times,
        })
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProviderAdapter;
    use modelflow_core::types::PricingPolicy;

    fn model(id: &str, provider: ProviderKind, pricing: PricingPolicy) -> ModelDescriptor {
        ModelDescriptor::new(id, provider, id, 4096, pricing).with_streaming()
    }

    async fn registry_with(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
    ) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        for adapter in adapters {
            registry.register_adapter(adapter);
        }
        registry.initialize().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_empty_catalog_selection_fails() {
        let registry = ModelRegistry::new();
        let request = GenerationRequest::new("hello");

        assert!(matches!(
            registry.select_model(&request),
            Err(Error::NoAvailableModel)
        ));
    }

    #[tokio::test]
    async fn test_preferred_model_always_wins() {
        let adapter = Arc::new(MockProviderAdapter::new(
            ProviderKind::Custom,
            vec![
                // Custom + paid: scores far below the free one
                model("expensive", ProviderKind::Custom, PricingPolicy::per_token(0.01, 0.01)),
                model("free", ProviderKind::Custom, PricingPolicy::Free),
            ],
            "ok",
        ));
        let registry = registry_with(vec![adapter]).await;

        let request = GenerationRequest::new("hello").with_preferred_model("expensive");
        assert_eq!(registry.select_model(&request).unwrap(), "expensive");
    }

    #[tokio::test]
    async fn test_inactive_preferred_falls_through() {
        let adapter = Arc::new(MockProviderAdapter::new(
            ProviderKind::Custom,
            vec![
                model("a", ProviderKind::Custom, PricingPolicy::Free),
                model("b", ProviderKind::Custom, PricingPolicy::Free),
            ],
            "ok",
        ));
        let registry = registry_with(vec![adapter]).await;
        registry
            .configure_model("a", &serde_json::json!({"is_active": false}))
            .await
            .unwrap();

        let request = GenerationRequest::new("hello").with_preferred_model("a");
        assert_eq!(registry.select_model(&request).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_generate_stamps_metadata() {
        let adapter = Arc::new(MockProviderAdapter::new(
            ProviderKind::Custom,
            vec![model("m1", ProviderKind::Custom, PricingPolicy::per_token(0.001, 0.002))],
            "Echo",
        ));
        let registry = registry_with(vec![adapter]).await;

        let request = GenerationRequest::new("hello world");
        let response = registry.generate(&request).await.unwrap();

        assert_eq!(response.model_used, "m1");
        assert!(response.request_id.starts_with("req_"));
        assert!(response.estimated_cost > 0.0);
        assert_eq!(response.currency, "USD");
    }

    #[tokio::test]
    async fn test_fallback_chain_first_success_wins() {
        // Primary family fails; fallback family succeeds.
        let failing = Arc::new(MockProviderAdapter::failing(
            ProviderKind::Custom,
            vec![model("m1", ProviderKind::Custom, PricingPolicy::Free)],
        ));
        let working = Arc::new(MockProviderAdapter::new(
            ProviderKind::Local,
            vec![
                model("m2", ProviderKind::Local, PricingPolicy::Free),
                model("m3", ProviderKind::Local, PricingPolicy::Free),
            ],
            "ok",
        ));
        let registry = registry_with(vec![failing as Arc<dyn ProviderAdapter>, working]).await;

        let request = GenerationRequest::new("hello")
            .with_preferred_model("m1")
            .with_fallbacks(vec!["m2".to_string(), "m3".to_string()]);

        let response = registry.generate(&request).await.unwrap();
        assert_eq!(response.model_used, "m2");
    }

    #[tokio::test]
    async fn test_empty_fallback_list_fails_immediately() {
        let failing = Arc::new(MockProviderAdapter::failing(
            ProviderKind::Custom,
            vec![model("m1", ProviderKind::Custom, PricingPolicy::Free)],
        ));
        let registry = registry_with(vec![failing as Arc<dyn ProviderAdapter>]).await;

        let request = GenerationRequest::new("hello");
        match registry.generate(&request).await {
            Err(Error::AllModelsFailed { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("Expected AllModelsFailed, got {:?}", other.map(|r| r.model_used)),
        }
    }

    #[tokio::test]
    async fn test_stream_renumbers_from_zero() {
        let adapter = Arc::new(MockProviderAdapter::new(
            ProviderKind::Custom,
            vec![model("m1", ProviderKind::Custom, PricingPolicy::Free)],
            "alpha beta gamma",
        ));
        let registry = registry_with(vec![adapter as Arc<dyn ProviderAdapter>]).await;

        let request = GenerationRequest::new("hello");
        let mut stream = registry.generate_stream(&request).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }

        // The mock numbers from 1000; the orchestrator renumbers from 0.
        let ids: Vec<u64> = chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let last = chunks.last().unwrap();
        assert!(last.is_final);
        assert_eq!(last.model_used.as_deref(), Some("m1"));
        assert!(last.total_tokens.is_some());
    }

    #[tokio::test]
    async fn test_stream_requires_capability() {
        let mut descriptor = model("m1", ProviderKind::Custom, PricingPolicy::Free);
        descriptor.supports_streaming = false;
        let adapter = Arc::new(MockProviderAdapter::new(
            ProviderKind::Custom,
            vec![descriptor],
            "ok",
        ));
        let registry = registry_with(vec![adapter as Arc<dyn ProviderAdapter>]).await;

        let request = GenerationRequest::new("hello");
        assert!(matches!(
            registry.generate_stream(&request).await,
            Err(Error::StreamingUnsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_health_checks_mark_unhealthy() {
        let adapter = Arc::new(MockProviderAdapter::new(
            ProviderKind::Custom,
            vec![model("m1", ProviderKind::Custom, PricingPolicy::Free)],
            "ok",
        ));
        let mut registry = ModelRegistry::new();
        registry.register_adapter(adapter.clone());
        registry.initialize().await.unwrap();

        adapter.set_healthy(false);
        registry.run_health_checks().await;

        let descriptor = registry.get_model("m1").unwrap();
        assert_eq!(descriptor.health_status, HealthStatus::Unhealthy);
        assert!(descriptor.last_health_check.is_some());

        // Unhealthy models stay in the catalog
        assert_eq!(registry.model_count(), 1);
    }
}

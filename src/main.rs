#![deny(unused)]
//! Modelflow - AI Provider Orchestration Service
//!
//! Routes generation requests across interchangeable AI model providers,
//! applies user-defined processing rules, tracks token consumption and
//! cost, and executes multi-step automation workflows.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use modelflow_core::config::AppConfig;
use modelflow_core::traits::{CrmClient, EventPublisher, ExecutionStore, RuleSetStore, UsageStore};
use modelflow_crm::HttpCrmClient;
use modelflow_model_gateway::{LocalHttpAdapter, ModelRegistry, RigAdapter};
use modelflow_rules::RuleEngine;
use modelflow_service::GenerationPipeline;
use modelflow_store::{
    InMemoryEventBus, InMemoryExecutionStore, InMemoryRuleSetStore, InMemoryUsageStore,
    RedisEventPublisher, RedisExecutionStore,
};
use modelflow_usage::UsageLedger;
use modelflow_workflow::{AgentSet, WorkflowExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!("Starting Modelflow v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Config load failed, using defaults");
        AppConfig::default()
    });

    // =========================================================================
    // Model registry and provider adapters
    // =========================================================================
    let mut registry = ModelRegistry::new()
        .with_timeouts(
            Duration::from_secs(config.orchestrator.generate_timeout_secs),
            Duration::from_secs(config.orchestrator.stream_timeout_secs),
        )
        .with_latency_window(config.orchestrator.latency_window);

    if let Some(hosted_a) = &config.providers.hosted_a {
        if hosted_a.enabled {
            if let Some(key) = &hosted_a.api_key {
                std::env::set_var("OPENAI_API_KEY", key.expose_secret());
            }
            registry.register_adapter(Arc::new(RigAdapter::default_hosted_a()));
        }
    }
    if let Some(hosted_b) = &config.providers.hosted_b {
        if hosted_b.enabled {
            if let Some(key) = &hosted_b.api_key {
                std::env::set_var("ANTHROPIC_API_KEY", key.expose_secret());
            }
            registry.register_adapter(Arc::new(RigAdapter::default_hosted_b()));
        }
    }
    if let Some(local) = &config.providers.local {
        if local.enabled {
            registry.register_adapter(Arc::new(LocalHttpAdapter::new(&local.base_url)));
        }
    }

    registry.initialize().await?;
    let registry = Arc::new(registry);

    if registry.model_count() == 0 {
        tracing::error!("No provider produced any model; nothing to serve");
        std::process::exit(1);
    }

    let health_handle = registry.spawn_health_loop(Duration::from_secs(
        config.orchestrator.health_check_interval_secs,
    ));
    tracing::info!(models = registry.model_count(), "Model registry ready");

    // =========================================================================
    // Stores and event channel
    // =========================================================================
    let usage_store: Arc<dyn UsageStore> = Arc::new(InMemoryUsageStore::new());
    let rule_store: Arc<dyn RuleSetStore> = Arc::new(InMemoryRuleSetStore::new());

    let (execution_store, events): (Arc<dyn ExecutionStore>, Arc<dyn EventPublisher>) =
        match &config.store.redis_url {
            Some(url) => {
                tracing::info!(url = %url, "Using Redis for executions and events");
                (
                    Arc::new(RedisExecutionStore::new(url, "modelflow:execution", 3600 * 24)?),
                    Arc::new(RedisEventPublisher::new(url, "modelflow:events")?),
                )
            }
            None => {
                tracing::info!("REDIS_URL not set - using in-memory stores");
                (
                    Arc::new(InMemoryExecutionStore::new()),
                    Arc::new(InMemoryEventBus::new()),
                )
            }
        };

    // =========================================================================
    // Rule engine, ledger, pipeline
    // =========================================================================
    let rules = Arc::new(RuleEngine::new(rule_store).with_events(events.clone()));
    let ledger = Arc::new(UsageLedger::new(usage_store));

    let mut pipeline = GenerationPipeline::new(registry.clone(), rules.clone(), ledger.clone())
        .with_events(events.clone());
    if config.retrieval.enabled {
        // No embedding backend is wired yet; the deterministic hash embedder
        // keeps the retrieval path exercised until one is.
        let vector_store = Arc::new(modelflow_store::SimpleVectorStore::new(Arc::new(
            modelflow_core::mocks::MockEmbedder::new(),
        )));
        pipeline = pipeline.with_retriever(
            vector_store,
            config.retrieval.top_k,
            config.retrieval.threshold,
        );
    }
    let pipeline = Arc::new(pipeline);
    tracing::info!("Generation pipeline ready");

    // =========================================================================
    // CRM collaborator and workflow executor
    // =========================================================================
    let crm: Arc<dyn CrmClient> = Arc::new(HttpCrmClient::new(
        &config.crm.base_url,
        config.crm.api_key.clone(),
        Duration::from_secs(config.crm.timeout_secs),
    )?);

    let agents = Arc::new(AgentSet::new(pipeline.clone(), crm.clone()));
    let executor = Arc::new(
        WorkflowExecutor::new(crm, execution_store, events, agents)
            .with_max_steps(config.workflow.max_steps),
    );
    tracing::info!(
        pending_approvals = executor.approvals().list_pending().len(),
        "Workflow executor ready"
    );

    // The HTTP layer mounts on top of `pipeline` and `executor`; run until
    // interrupted.
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    health_handle.abort();

    Ok(())
}

use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub providers: ProvidersConfig,
    pub store: StoreConfig,
    pub crm: CrmConfig,
    pub workflow: WorkflowConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Interval between background health probe cycles.
    pub health_check_interval_secs: u64,
    /// Per-call timeout for single-shot generation.
    pub generate_timeout_secs: u64,
    /// Per-call timeout for streaming generation (much longer: streams are
    /// expected to produce partial output promptly but run long overall).
    pub stream_timeout_secs: u64,
    /// Rolling latency samples retained per model.
    pub latency_window: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub hosted_a: Option<HostedProviderConfig>,
    pub hosted_b: Option<HostedProviderConfig>,
    pub local: Option<LocalProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostedProviderConfig {
    pub enabled: bool,
    pub api_key: Option<Secret<String>>,
    pub models: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalProviderConfig {
    pub enabled: bool,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// When set, executions and events go through Redis; otherwise in-memory.
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrmConfig {
    pub base_url: String,
    pub api_key: Option<Secret<String>>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Node-visit budget per execution; exceeding it fails the run.
    pub max_steps: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub threshold: f32,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("MODELFLOW_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__CRM__BASE_URL=... to app.crm.base_url
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig {
                health_check_interval_secs: 300,
                generate_timeout_secs: 60,
                stream_timeout_secs: 600,
                latency_window: 100,
            },
            providers: ProvidersConfig {
                hosted_a: None,
                hosted_b: None,
                local: Some(LocalProviderConfig {
                    enabled: true,
                    base_url: "http://localhost:11434".into(),
                }),
            },
            store: StoreConfig { redis_url: None },
            crm: CrmConfig {
                base_url: "http://localhost:3001".into(),
                api_key: None,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig { max_steps: 100 },
            retrieval: RetrievalConfig {
                enabled: false,
                top_k: 5,
                threshold: 0.7,
            },
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Model Catalog Types
// =============================================================================

/// Provider family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// First hosted API family (OpenAI-style).
    HostedA,
    /// Second hosted API family (Anthropic-style).
    HostedB,
    /// Local inference server.
    Local,
    /// Custom/self-managed backend.
    Custom,
}

impl ProviderKind {
    /// Stable string name, used for registry keys and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostedA => "hosted_a",
            Self::HostedB => "hosted_b",
            Self::Local => "local",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a catalog entry as observed by the probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// Pricing policy attached to a model. Immutable once registered; cost
/// computation is a pure function of this value and observed token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pricing_model", rename_all = "snake_case")]
pub enum PricingPolicy {
    Free,
    PerToken {
        /// Cost per input token.
        input_cost: f64,
        /// Cost per output token.
        output_cost: f64,
        currency: String,
    },
    PerRequest {
        cost: f64,
        currency: String,
    },
    Subscription,
}

impl PricingPolicy {
    /// Currency this policy bills in. Free/subscription policies default to USD.
    pub fn currency(&self) -> &str {
        match self {
            Self::PerToken { currency, .. } | Self::PerRequest { currency, .. } => currency,
            Self::Free | Self::Subscription => "USD",
        }
    }

    /// Convenience constructor for per-token USD pricing.
    pub fn per_token(input_cost: f64, output_cost: f64) -> Self {
        Self::PerToken {
            input_cost,
            output_cost,
            currency: "USD".to_string(),
        }
    }
}

/// A model known to the registry.
///
/// Created at provider initialization, mutated only by the health-check loop
/// and explicit configuration calls. Never removed during process lifetime,
/// only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Globally unique model identifier.
    pub model_id: String,
    /// Provider family that serves this model.
    pub provider: ProviderKind,
    /// Human-readable model name.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    /// Maximum context length in tokens.
    pub max_context: u32,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_functions: bool,
    #[serde(default)]
    pub supports_vision: bool,

    pub pricing: PricingPolicy,

    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    /// Create a new descriptor with default capability flags.
    pub fn new(
        model_id: impl Into<String>,
        provider: ProviderKind,
        name: impl Into<String>,
        max_context: u32,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            provider,
            name: name.into(),
            description: None,
            max_context,
            supports_streaming: false,
            supports_functions: false,
            supports_vision: false,
            pricing,
            is_active: true,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
        }
    }

    /// Mark the model as streaming-capable.
    pub fn with_streaming(mut self) -> Self {
        self.supports_streaming = true;
        self
    }

    /// Mark the model as function-calling-capable.
    pub fn with_functions(mut self) -> Self {
        self.supports_functions = true;
        self
    }

    /// A model is selectable when it is both active and healthy.
    pub fn is_available(&self) -> bool {
        self.is_active && self.health_status == HealthStatus::Healthy
    }
}

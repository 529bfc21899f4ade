use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Generation Request/Response Types
// =============================================================================

/// Token consumption for a single generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A generation request as submitted by a caller.
///
/// Immutable from the caller's perspective: the rule engine produces modified
/// copies rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The input prompt.
    pub prompt: String,
    /// User ID for tracking and billing.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session ID for context.
    #[serde(default)]
    pub session_id: Option<String>,

    /// Preferred model; an available preferred model always wins selection.
    #[serde(default)]
    pub preferred_model: Option<String>,
    /// Fallback models tried in order after the primary fails.
    #[serde(default)]
    pub fallback_models: Vec<String>,

    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(default = "default_top_p")]
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    #[serde(default)]
    pub top_k: Option<u32>,

    /// Free-form context map, readable by rules and enrichment steps.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Rule set to apply around this request.
    #[serde(default)]
    pub rule_set_id: Option<String>,

    /// Lead this request relates to (CRM flows).
    #[serde(default)]
    pub lead_id: Option<String>,
    /// Kind of message being produced (email, whatsapp, ...).
    #[serde(default)]
    pub message_type: Option<String>,
    /// Response language.
    #[serde(default = "default_language")]
    pub language: Option<String>,
}

fn default_max_tokens() -> Option<u32> {
    Some(1000)
}

fn default_temperature() -> Option<f32> {
    Some(0.7)
}

fn default_top_p() -> Option<f32> {
    Some(1.0)
}

fn default_language() -> Option<String> {
    Some("en".to_string())
}

impl GenerationRequest {
    /// Create a request with default generation parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            user_id: None,
            session_id: None,
            preferred_model: None,
            fallback_models: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: None,
            context: Map::new(),
            rule_set_id: None,
            lead_id: None,
            message_type: None,
            language: default_language(),
        }
    }

    /// Set the user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the preferred model.
    pub fn with_preferred_model(mut self, model_id: impl Into<String>) -> Self {
        self.preferred_model = Some(model_id.into());
        self
    }

    /// Set the fallback chain.
    pub fn with_fallbacks(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Set the rule set to apply.
    pub fn with_rule_set(mut self, rule_set_id: impl Into<String>) -> Self {
        self.rule_set_id = Some(rule_set_id.into());
        self
    }
}

/// A generation response.
///
/// Created once per request by the orchestrator; output rules produce
/// modified copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated content.
    pub content: String,
    /// Model that actually produced the response.
    pub model_used: String,

    /// Request id assigned by the orchestrator, not the caller.
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// End-to-end processing latency in milliseconds.
    pub processing_time_ms: f64,

    pub token_usage: TokenUsage,
    /// Cost computed from the model's pricing policy.
    pub estimated_cost: f64,
    pub currency: String,

    /// Confidence score, when the provider reports one.
    #[serde(default)]
    pub confidence_score: Option<f32>,
    /// Content safety scores, when available.
    #[serde(default)]
    pub safety_scores: Map<String, Value>,

    /// Context that was used in generation.
    #[serde(default)]
    pub context_used: Map<String, Value>,
    /// Ids of the rules that fired on this request/response.
    #[serde(default)]
    pub rules_applied: Vec<String>,
}

impl GenerationResponse {
    /// Create a bare response as a provider adapter would, before the
    /// orchestrator stamps request metadata onto it.
    pub fn from_provider(content: impl Into<String>, token_usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            model_used: String::new(),
            request_id: String::new(),
            timestamp: Utc::now(),
            processing_time_ms: 0.0,
            token_usage,
            estimated_cost: 0.0,
            currency: "USD".to_string(),
            confidence_score: None,
            safety_scores: Map::new(),
            context_used: Map::new(),
            rules_applied: Vec::new(),
        }
    }
}

/// One chunk of a streaming response.
///
/// Chunk ids are assigned sequentially from 0 by the orchestrator, so
/// adapters need not agree on numbering. The sequence is finite and
/// terminated by a chunk with `is_final = true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub chunk_id: u64,
    pub content: String,
    pub is_final: bool,
    #[serde(default)]
    pub token_count: Option<u64>,

    /// Aggregate token estimate, set on the final chunk.
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Producing model, set on the final chunk.
    #[serde(default)]
    pub model_used: Option<String>,
}

impl StreamChunk {
    /// A content-bearing chunk.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// The terminating chunk of a stream.
    pub fn terminal(model_used: impl Into<String>, total_tokens: u64) -> Self {
        Self {
            is_final: true,
            total_tokens: Some(total_tokens),
            model_used: Some(model_used.into()),
            ..Default::default()
        }
    }
}

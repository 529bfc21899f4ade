//! Rig-backed adapter for hosted provider APIs.
//!
//! Wraps Rig's provider clients behind the ProviderAdapter trait so the
//! registry never sees transport or auth details.

use async_trait::async_trait;

use modelflow_core::{
    traits::{ChunkStream, ProviderAdapter},
    types::{
        GenerationRequest, GenerationResponse, ModelDescriptor, PricingPolicy, ProviderKind,
        TokenUsage,
    },
    Error, Result,
};

// Import required Rig traits
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;

/// Adapter for one hosted provider family, backed by Rig.
///
/// Hosted models are exposed without streaming support; the local adapter
/// covers the streaming path.
pub struct RigAdapter {
    provider: ProviderKind,
    models: Vec<ModelDescriptor>,
}

impl RigAdapter {
    /// Create an adapter for the first hosted family (OpenAI-style API).
    pub fn hosted_a(models: Vec<ModelDescriptor>) -> Self {
        Self {
            provider: ProviderKind::HostedA,
            models,
        }
    }

    /// Create an adapter for the second hosted family (Anthropic-style API).
    pub fn hosted_b(models: Vec<ModelDescriptor>) -> Self {
        Self {
            provider: ProviderKind::HostedB,
            models,
        }
    }

    /// Default catalog for the first hosted family.
    pub fn default_hosted_a() -> Self {
        Self::hosted_a(vec![
            ModelDescriptor::new(
                "gpt-4o-mini",
                ProviderKind::HostedA,
                "GPT-4o Mini",
                128_000,
                PricingPolicy::per_token(0.000_000_15, 0.000_000_6),
            )
            .with_functions(),
            ModelDescriptor::new(
                "gpt-4o",
                ProviderKind::HostedA,
                "GPT-4o",
                128_000,
                PricingPolicy::per_token(0.000_002_5, 0.000_01),
            )
            .with_functions(),
        ])
    }

    /// Default catalog for the second hosted family.
    pub fn default_hosted_b() -> Self {
        Self::hosted_b(vec![
            ModelDescriptor::new(
                "claude-3-haiku-20240307",
                ProviderKind::HostedB,
                "Claude 3 Haiku",
                200_000,
                PricingPolicy::per_token(0.000_000_25, 0.000_001_25),
            ),
            ModelDescriptor::new(
                "claude-3-5-sonnet-20241022",
                ProviderKind::HostedB,
                "Claude 3.5 Sonnet",
                200_000,
                PricingPolicy::per_token(0.000_003, 0.000_015),
            )
            .with_functions(),
        ])
    }

    fn env_key(&self) -> &'static str {
        match self.provider {
            ProviderKind::HostedA => "OPENAI_API_KEY",
            _ => "ANTHROPIC_API_KEY",
        }
    }

    fn require_key(&self) -> Result<()> {
        // Check env var first to avoid a panic inside the Rig client
        if std::env::var(self.env_key()).is_err() {
            return Err(Error::model_provider(format!("{} not set", self.env_key())));
        }
        Ok(())
    }

    fn build_prompt(&self, request: &GenerationRequest) -> String {
        let mut prompt = request.prompt.clone();
        if let Some(language) = &request.language {
            if language != "en" {
                prompt = format!("{}\n\nRespond in language: {}", prompt, language);
            }
        }
        prompt
    }

    async fn call_hosted_a(&self, model_id: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client.agent(model_id).build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| Error::model_provider(format!("Hosted-A error: {}", e)))
    }

    async fn call_hosted_b(&self, model_id: &str, prompt: &str) -> Result<String> {
        use rig::providers::anthropic;

        let client = anthropic::Client::from_env();
        let agent = client.agent(model_id).build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| Error::model_provider(format!("Hosted-B error: {}", e)))
    }
}

#[async_trait]
impl ProviderAdapter for RigAdapter {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn initialize(&self) -> Result<()> {
        self.require_key()
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self.models.clone())
    }

    async fn generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse> {
        self.require_key()?;

        let prompt = self.build_prompt(request);
        tracing::debug!(
            provider = %self.provider,
            model = %model_id,
            prompt_len = prompt.len(),
            "Calling hosted model"
        );

        let content = match self.provider {
            ProviderKind::HostedA => self.call_hosted_a(model_id, &prompt).await?,
            _ => self.call_hosted_b(model_id, &prompt).await?,
        };

        // Hosted responses via Rig's prompt interface carry no usage data;
        // estimate at ~4 chars per token.
        let usage = TokenUsage::new(prompt.len() as u64 / 4, content.len() as u64 / 4);
        Ok(GenerationResponse::from_provider(content, usage))
    }

    async fn generate_stream(
        &self,
        model_id: &str,
        _request: &GenerationRequest,
    ) -> Result<ChunkStream> {
        Err(Error::StreamingUnsupported(model_id.to_string()))
    }

    async fn check_health(&self, _model_id: &str) -> Result<bool> {
        // Credential-presence probe; a missing key makes every call fail,
        // which is exactly what unhealthy means here.
        Ok(std::env::var(self.env_key()).is_ok())
    }

    async fn configure(
        &self,
        model_id: &str,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "model_id": model_id,
            "status": "accepted",
            "applied": options,
        }))
    }
}

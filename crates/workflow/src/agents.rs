//! Specialized AI agents invoked by `ai_agent` workflow nodes.
//!
//! Each agent produces a structured result map that the executor merges
//! into the execution's variables. Agents go through the same generation
//! pipeline as direct requests, so rules, fallback, and usage tracking all
//! apply to workflow-driven generations too.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use modelflow_core::{
    template::render_vars,
    traits::CrmClient,
    types::GenerationRequest,
    Result,
};
use modelflow_service::GenerationPipeline;

/// Dispatches an `ai_agent` node to a concrete agent implementation.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        agent_type: &str,
        lead_id: Option<&str>,
        prompt: &str,
        variables: &Map<String, Value>,
    ) -> Result<Map<String, Value>>;
}

/// The built-in agents: lead qualifier, message generator, follow-up
/// scheduler, and a generic fallback.
pub struct AgentSet {
    pipeline: Arc<GenerationPipeline>,
    crm: Arc<dyn CrmClient>,
}

/// Extract a JSON object from model output, tolerating code fences.
fn parse_structured(content: &str) -> Option<Map<String, Value>> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    serde_json::from_str::<Value>(trimmed)
        .ok()?
        .as_object()
        .cloned()
}

impl AgentSet {
    pub fn new(pipeline: Arc<GenerationPipeline>, crm: Arc<dyn CrmClient>) -> Self {
        Self { pipeline, crm }
    }

    async fn lead_context(&self, lead_id: Option<&str>) -> (Value, Vec<Value>) {
        let Some(lead_id) = lead_id else {
            return (Value::Null, Vec::new());
        };

        let lead = match self.crm.get_lead(lead_id).await {
            Ok(lead) => lead.unwrap_or(Value::Null),
            Err(e) => {
                tracing::warn!(lead = %lead_id, error = %e, "Lead fetch failed");
                Value::Null
            }
        };
        let interactions = match self.crm.get_lead_interactions(lead_id).await {
            Ok(interactions) => interactions,
            Err(e) => {
                tracing::warn!(lead = %lead_id, error = %e, "Interaction fetch failed");
                Vec::new()
            }
        };

        (lead, interactions)
    }

    async fn generate(&self, prompt: String) -> Result<(String, Option<f32>, String)> {
        let request = GenerationRequest::new(prompt);
        let response = self.pipeline.generate(&request).await?;
        Ok((
            response.content,
            response.confidence_score,
            response.model_used,
        ))
    }

    /// Analyze a lead and assign a qualification score, writing significant
    /// results back to the CRM.
    async fn lead_qualifier(
        &self,
        lead_id: Option<&str>,
        custom_prompt: &str,
    ) -> Result<Map<String, Value>> {
        let (lead, interactions) = self.lead_context(lead_id).await;

        let context = if custom_prompt.is_empty() {
            "Standard lead qualification analysis"
        } else {
            custom_prompt
        };

        let prompt = format!(
            "You are an expert lead qualification agent for a CRM system. \
             Analyze the lead based on communication responsiveness, business fit, \
             urgency signals, budget indicators, and decision-making authority.\n\
             Provide a score from 0-100 and a classification (COLD, WARM, HOT).\n\
             Respond in JSON format:\n\
             {{\"score\": 85, \"classification\": \"HOT\", \"priority\": \"HIGH\", \
             \"reasoning\": \"...\", \"next_actions\": [\"...\"], \"confidence\": 0.9}}\n\n\
             {}\n\nLead Information:\n{}\n\nRecent Interactions:\n{}\n\nQualify this lead:",
            context,
            lead,
            json!(interactions),
        );

        let (content, _, _) = self.generate(prompt).await?;

        let mut result = parse_structured(&content).unwrap_or_else(|| {
            let mut fallback = Map::new();
            fallback.insert("response".to_string(), json!(content));
            fallback.insert("confidence".to_string(), json!(0.5));
            fallback
        });
        result.insert("agent_type".to_string(), json!("lead_qualifier"));
        if let Some(lead_id) = lead_id {
            result.insert("lead_id".to_string(), json!(lead_id));

            // Push score and classification back to the CRM; a failed
            // write-back is not fatal to the workflow step.
            if let Some(score) = result.get("score").cloned() {
                let patch = json!({
                    "aiScore": score,
                    "status": result.get("classification").cloned().unwrap_or(json!("COLD")),
                });
                if let Err(e) = self.crm.update_lead(lead_id, &patch).await {
                    tracing::warn!(lead = %lead_id, error = %e, "Score write-back failed");
                }
            }
        }

        Ok(result)
    }

    /// Draft an outreach message for a lead.
    async fn message_generator(
        &self,
        lead_id: Option<&str>,
        custom_prompt: &str,
        variables: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let (lead, _) = self.lead_context(lead_id).await;

        let history = match lead_id {
            Some(lead_id) => match self.crm.get_lead_messages(lead_id).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(lead = %lead_id, error = %e, "Message history fetch failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let instruction = if custom_prompt.is_empty() {
            "Write a short, personalized follow-up message for this lead.".to_string()
        } else {
            render_vars(custom_prompt, variables)
        };

        let prompt = format!(
            "You are a sales communication assistant. {}\n\n\
             Lead Information:\n{}\n\nPrevious Messages:\n{}\n\n\
             Reply with the message text only.",
            instruction,
            lead,
            json!(history),
        );

        let (content, confidence, _) = self.generate(prompt).await?;

        let mut result = Map::new();
        result.insert("agent_type".to_string(), json!("message_generator"));
        result.insert("message".to_string(), json!(content.trim()));
        result.insert("response".to_string(), json!(content));
        result.insert(
            "confidence".to_string(),
            json!(confidence.unwrap_or(0.8)),
        );
        Ok(result)
    }

    /// Propose when and how to follow up with a lead.
    async fn follow_up_scheduler(
        &self,
        lead_id: Option<&str>,
        custom_prompt: &str,
    ) -> Result<Map<String, Value>> {
        let (lead, interactions) = self.lead_context(lead_id).await;

        let prompt = format!(
            "You schedule follow-ups for a CRM. {}\n\n\
             Based on the lead and interaction history, propose the next \
             follow-up. Respond in JSON format:\n\
             {{\"days\": 3, \"channel\": \"email\", \"reason\": \"...\"}}\n\n\
             Lead Information:\n{}\n\nRecent Interactions:\n{}",
            custom_prompt,
            lead,
            json!(interactions),
        );

        let (content, _, _) = self.generate(prompt).await?;
        let parsed = parse_structured(&content).unwrap_or_default();

        let mut result = Map::new();
        result.insert("agent_type".to_string(), json!("follow_up_scheduler"));
        result.insert(
            "follow_up_days".to_string(),
            parsed.get("days").cloned().unwrap_or(json!(3)),
        );
        result.insert(
            "follow_up_channel".to_string(),
            parsed.get("channel").cloned().unwrap_or(json!("email")),
        );
        if let Some(reason) = parsed.get("reason") {
            result.insert("follow_up_reason".to_string(), reason.clone());
        }
        result.insert("response".to_string(), json!(content));
        Ok(result)
    }

    /// Generic agent: render the node prompt against the variables and
    /// return whatever the model produced, merging structured output keys.
    async fn generic(
        &self,
        prompt: &str,
        variables: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let rendered = render_vars(prompt, variables);
        let (content, confidence, model_used) = self.generate(rendered).await?;

        let mut result = parse_structured(&content).unwrap_or_default();
        result.insert("response".to_string(), json!(content));
        result
            .entry("confidence".to_string())
            .or_insert(json!(confidence.unwrap_or(0.8)));
        result.insert("model_used".to_string(), json!(model_used));
        Ok(result)
    }
}

#[async_trait]
impl AgentDispatcher for AgentSet {
    async fn dispatch(
        &self,
        agent_type: &str,
        lead_id: Option<&str>,
        prompt: &str,
        variables: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        tracing::debug!(agent = %agent_type, "Dispatching AI agent");
        match agent_type {
            "lead_qualifier" => self.lead_qualifier(lead_id, prompt).await,
            "message_generator" => self.message_generator(lead_id, prompt, variables).await,
            "follow_up_scheduler" => self.follow_up_scheduler(lead_id, prompt).await,
            _ => self.generic(prompt, variables).await,
        }
    }
}

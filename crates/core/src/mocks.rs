//! Mock collaborator implementations for testing.
//!
//! These mocks let the orchestration, rule, and workflow layers be tested
//! without real network collaborators.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::EventEnvelope;
use crate::traits::{CrmClient, Embedder, EventPublisher};
use crate::types::WorkflowDefinition;

// =============================================================================
// Mock CRM Client
// =============================================================================

/// Mock CRM collaborator that records side effects and serves canned data.
pub struct MockCrmClient {
    lead: Option<Value>,
    workflow: Option<WorkflowDefinition>,
    should_fail: bool,
    sent_messages: Mutex<Vec<(String, String)>>,
    lead_updates: Mutex<Vec<(String, Value)>>,
}

impl MockCrmClient {
    /// Create a mock with a generic lead record.
    pub fn new() -> Self {
        Self {
            lead: Some(json!({
                "id": "lead-1",
                "name": "Test Lead",
                "email": "lead@example.com",
                "status": "NEW"
            })),
            workflow: None,
            should_fail: false,
            sent_messages: Mutex::new(Vec::new()),
            lead_updates: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that fails every call with a transport error.
    pub fn failing() -> Self {
        Self {
            lead: None,
            workflow: None,
            should_fail: true,
            sent_messages: Mutex::new(Vec::new()),
            lead_updates: Mutex::new(Vec::new()),
        }
    }

    /// Serve a specific workflow definition.
    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Serve a specific lead record.
    pub fn with_lead(mut self, lead: Value) -> Self {
        self.lead = Some(lead);
        self
    }

    /// Messages sent through this mock, as (lead_id, content) pairs.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent_messages.lock().unwrap().clone()
    }

    /// Lead patches applied through this mock.
    pub fn lead_updates(&self) -> Vec<(String, Value)> {
        self.lead_updates.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.should_fail {
            return Err(Error::crm("Mock CRM transport failure"));
        }
        Ok(())
    }
}

impl Default for MockCrmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrmClient for MockCrmClient {
    async fn get_lead(&self, _lead_id: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.lead.clone())
    }

    async fn update_lead(&self, lead_id: &str, patch: &Value) -> Result<Option<Value>> {
        self.check()?;
        self.lead_updates
            .lock()
            .unwrap()
            .push((lead_id.to_string(), patch.clone()));
        Ok(self.lead.clone())
    }

    async fn send_message(&self, lead_id: &str, content: &str) -> Result<Option<Value>> {
        self.check()?;
        let id = format!("msg-{}", self.sent_messages.lock().unwrap().len() + 1);
        self.sent_messages
            .lock()
            .unwrap()
            .push((lead_id.to_string(), content.to_string()));
        Ok(Some(json!({ "message_id": id })))
    }

    async fn get_workflow_definition(
        &self,
        _workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>> {
        self.check()?;
        Ok(self.workflow.clone())
    }

    async fn get_lead_interactions(&self, _lead_id: &str) -> Result<Vec<Value>> {
        self.check()?;
        Ok(vec![json!({"type": "EMAIL_OPEN", "at": "2024-01-01T00:00:00Z"})])
    }

    async fn get_lead_messages(&self, _lead_id: &str) -> Result<Vec<Value>> {
        self.check()?;
        Ok(Vec::new())
    }
}

// =============================================================================
// Mock Embedder
// =============================================================================

/// Deterministic embedder producing stable pseudo-embeddings from a hash of
/// the text, good enough for similarity plumbing tests.
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { dimensions: 128 }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_add(b as u64));
        Ok((0..self.dimensions)
            .map(|i| ((hash.wrapping_add(i as u64)) % 1000) as f32 / 1000.0)
            .collect())
    }
}

// =============================================================================
// Event Publishers
// =============================================================================

/// Event publisher that drops everything.
pub struct NullEventPublisher;

#[async_trait]
impl EventPublisher for NullEventPublisher {
    async fn publish(&self, _event: EventEnvelope) -> Result<()> {
        Ok(())
    }
}

/// Event publisher that collects events for assertions.
pub struct CollectingEventPublisher {
    events: Mutex<Vec<EventEnvelope>>,
}

impl CollectingEventPublisher {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for CollectingEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for CollectingEventPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    #[tokio::test]
    async fn test_mock_crm_records_messages() {
        let crm = MockCrmClient::new();
        crm.send_message("lead-1", "hello").await.unwrap();

        let sent = crm.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "lead-1");
    }

    #[tokio::test]
    async fn test_failing_crm() {
        let crm = MockCrmClient::failing();
        assert!(crm.get_lead("lead-1").await.is_err());
    }

    #[tokio::test]
    async fn test_collecting_publisher() {
        let publisher = CollectingEventPublisher::new();
        publisher
            .publish(EventEnvelope::new(
                EventType::ExecutionStep,
                json!({"node": "n1"}),
            ))
            .await
            .unwrap();

        assert_eq!(publisher.events().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }
}

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::WorkflowDefinition;

/// External CRM collaborator.
///
/// All calls may fail with a transport error; the workflow executor treats
/// such failures as node-local errors, not process crashes.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Fetch a lead record.
    async fn get_lead(&self, lead_id: &str) -> Result<Option<Value>>;

    /// Apply a field patch to a lead.
    async fn update_lead(&self, lead_id: &str, patch: &Value) -> Result<Option<Value>>;

    /// Send a message to a lead. Returns the created message record.
    async fn send_message(&self, lead_id: &str, content: &str) -> Result<Option<Value>>;

    /// Fetch a workflow definition.
    async fn get_workflow_definition(&self, workflow_id: &str)
        -> Result<Option<WorkflowDefinition>>;

    /// Interaction history for a lead.
    async fn get_lead_interactions(&self, lead_id: &str) -> Result<Vec<Value>>;

    /// Message history for a lead.
    async fn get_lead_messages(&self, lead_id: &str) -> Result<Vec<Value>>;
}

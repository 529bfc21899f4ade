use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// =============================================================================
// Workflow Types
// =============================================================================

/// Typed node kinds understood by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    AiAgent,
    Condition,
    HumanApproval,
    SendMessage,
    UpdateLead,
    Delay,
}

/// One node of a declared workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Node-type-specific configuration (prompt, condition template, ...).
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Outgoing connections: a `next` key produces an unconditional edge;
    /// `true`/`false` keys produce a conditional edge routed by the node's
    /// last-computed condition result.
    #[serde(default)]
    pub connections: HashMap<String, String>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            config: Map::new(),
            connections: HashMap::new(),
        }
    }

    /// Set a config key.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Add an unconditional edge to the next node.
    pub fn with_next(mut self, target: impl Into<String>) -> Self {
        self.connections.insert("next".to_string(), target.into());
        self
    }

    /// Add a conditional edge pair.
    pub fn with_branches(
        mut self,
        on_true: impl Into<String>,
        on_false: impl Into<String>,
    ) -> Self {
        self.connections.insert("true".to_string(), on_true.into());
        self.connections
            .insert("false".to_string(), on_false.into());
        self
    }
}

/// A statically-declared workflow graph, as stored by the CRM collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// Lifecycle of one workflow execution.
///
/// Status moves only forward through PENDING → RUNNING → terminal; there is
/// no resurrection from a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One entry of an execution's step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub node_id: String,
    pub step_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A message produced during an execution (AI output, sent message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Mutable state threaded through a workflow run.
///
/// One instance per execution; mutated by each node handler, persisted at
/// start and at terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub lead_id: Option<String>,
    pub current_node: String,
    /// Accumulates AI outputs, condition results, and side-effect flags.
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Construct the initial (PENDING) state for a run.
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        lead_id: Option<String>,
        trigger_data: Map<String, Value>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            lead_id,
            current_node: String::new(),
            variables: trigger_data,
            messages: Vec::new(),
            steps: Vec::new(),
            status: ExecutionStatus::Pending,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Read a variable.
    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Set a variable.
    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }
}

/// A persisted approval request awaiting an external decision,
/// keyed by (execution_id, node_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub execution_id: String,
    pub node_id: String,
    pub message: String,
    pub context: Map<String, Value>,
    #[serde(default)]
    pub lead_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}

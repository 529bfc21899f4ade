//! Error types for Modelflow.

use thiserror::Error;

/// Result type alias using Modelflow's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Modelflow.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Model Gateway Errors
    // =========================================================================
    #[error("Model provider error: {0}")]
    ModelProvider(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("No available model for this request")]
    NoAvailableModel,

    #[error("All models failed after {attempts} attempt(s). Last error: {last}")]
    AllModelsFailed { attempts: usize, last: String },

    #[error("Model {0} does not support streaming")]
    StreamingUnsupported(String),

    // =========================================================================
    // Rule Engine Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rule engine error: {0}")]
    RuleEngine(String),

    // =========================================================================
    // Workflow Errors
    // =========================================================================
    #[error("Workflow definition error: {0}")]
    WorkflowDefinition(String),

    #[error("Workflow execution error: {0}")]
    WorkflowExecution(String),

    #[error("No pending approval for execution {execution_id}, node {node_id}")]
    ApprovalNotFound {
        execution_id: String,
        node_id: String,
    },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("CRM error: {0}")]
    Crm(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a model provider error.
    pub fn model_provider(msg: impl Into<String>) -> Self {
        Self::ModelProvider(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a rule engine error.
    pub fn rule_engine(msg: impl Into<String>) -> Self {
        Self::RuleEngine(msg.into())
    }

    /// Create a workflow definition error.
    pub fn workflow_definition(msg: impl Into<String>) -> Self {
        Self::WorkflowDefinition(msg.into())
    }

    /// Create a workflow execution error.
    pub fn workflow_execution(msg: impl Into<String>) -> Self {
        Self::WorkflowExecution(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a CRM error.
    pub fn crm(msg: impl Into<String>) -> Self {
        Self::Crm(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
